use std::collections::BTreeSet;

use indoc::formatdoc;
use sqlx::{query_scalar, Postgres, Transaction};
use taskqueue_task::Reference;
use tracing::info;

use crate::{
    quote_ident, quote_qualified,
    sql::{SCHEDULE_COLUMNS, TASK_COLUMNS},
    SetupError,
};

/// Rejects references that would clash with a queue column or can't be expressed safely.
pub fn validate_references(references: &[Reference]) -> Result<(), SetupError> {
    let mut seen = BTreeSet::new();
    for reference in references {
        let name = reference.name();
        if TASK_COLUMNS.contains(&name.as_str()) || SCHEDULE_COLUMNS.contains(&name.as_str()) {
            return Err(SetupError::ReservedColumn(name.clone()));
        }
        if [name, reference.table(), reference.column(), reference.sql_type()]
            .iter()
            .any(|part| part.trim().is_empty())
        {
            return Err(SetupError::InvalidReference(name.clone()));
        }
        if !is_plain_type(reference.sql_type()) {
            return Err(SetupError::InvalidReference(name.clone()));
        }
        if !seen.insert(name.as_str()) {
            return Err(SetupError::DuplicateReference(name.clone()));
        }
    }

    Ok(())
}

/// Type names are spliced into DDL and casts, only allow what a type name can contain
fn is_plain_type(sql_type: &str) -> bool {
    sql_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '(' | ')' | ',' | '.' | '[' | ']'))
}

async fn existing_columns(
    tx: &mut Transaction<'_, Postgres>,
    schema: &str,
    table: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let sql = formatdoc!(
        r#"
            select column_name::text
            from information_schema.columns
            where table_schema = $1 and table_name = $2
        "#
    );
    query_scalar(&sql)
        .bind(schema)
        .bind(table)
        .fetch_all(tx.as_mut())
        .await
}

/// Adds missing reference columns to `table` and drops the ones no longer configured.
pub async fn sync_reference_columns(
    tx: &mut Transaction<'_, Postgres>,
    schema: &str,
    table: &str,
    system_columns: &[&str],
    references: &[Reference],
) -> Result<(), SetupError> {
    let escaped_schema = quote_ident(schema);
    let existing = existing_columns(tx, schema, table).await?;

    for column in existing.iter() {
        let still_referenced = references.iter().any(|r| r.name() == column);
        if system_columns.contains(&column.as_str()) || still_referenced {
            continue;
        }

        info!(table, column, "Dropping reference column");
        let sql = format!(
            "alter table {escaped_schema}.{} drop column {} cascade",
            quote_ident(table),
            quote_ident(column)
        );
        sqlx::query(&sql).execute(tx.as_mut()).await?;
    }

    for reference in references {
        if !existing.iter().any(|column| column == reference.name()) {
            info!(table, column = reference.name(), "Adding reference column");
            let sql = formatdoc!(
                r#"
                    alter table {escaped_schema}.{table}
                        add column {column} {sql_type}
                        references {foreign_table} ({foreign_column}) on delete cascade
                "#,
                table = quote_ident(table),
                column = quote_ident(reference.name()),
                sql_type = reference.sql_type(),
                foreign_table = quote_qualified(reference.table()),
                foreign_column = quote_ident(reference.column()),
            );
            sqlx::query(&sql).execute(tx.as_mut()).await?;
        }

        let sql = format!(
            "create index if not exists {} on {escaped_schema}.{} using hash ({})",
            quote_ident(&format!("{table}_{}_idx", reference.name())),
            quote_ident(table),
            quote_ident(reference.name()),
        );
        sqlx::query(&sql).execute(tx.as_mut()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_columns_are_reserved() {
        let refs = [Reference::new("status", "organizations", "id", "uuid")];
        assert!(matches!(
            validate_references(&refs),
            Err(SetupError::ReservedColumn(name)) if name == "status"
        ));

        let refs = [Reference::new("task_queue", "organizations", "id", "uuid")];
        assert!(matches!(
            validate_references(&refs),
            Err(SetupError::ReservedColumn(_))
        ));
    }

    #[test]
    fn invalid_references_are_rejected() {
        let refs = [Reference::new("org_id", "", "id", "uuid")];
        assert!(matches!(
            validate_references(&refs),
            Err(SetupError::InvalidReference(_))
        ));

        let refs = [Reference::new("org_id", "organizations", "id", "uuid; drop table x")];
        assert!(matches!(
            validate_references(&refs),
            Err(SetupError::InvalidReference(_))
        ));

        let refs = [
            Reference::new("org_id", "organizations", "id", "uuid"),
            Reference::new("org_id", "teams", "id", "bigint"),
        ];
        assert!(matches!(
            validate_references(&refs),
            Err(SetupError::DuplicateReference(_))
        ));
    }

    #[test]
    fn plain_references_are_accepted() {
        let refs = [
            Reference::new("organization_id", "app.organizations", "id", "uuid"),
            Reference::new("account_id", "accounts", "id", "numeric(20, 0)"),
        ];
        assert!(validate_references(&refs).is_ok());
    }
}
