pub mod pg_version;
pub mod references;
pub mod sql;

use pg_version::{fetch_server_version, major_version};
use references::{sync_reference_columns, validate_references};
use sql::{execute_base_schema, SCHEDULE_COLUMNS, TASK_COLUMNS};
use sqlx::{query, Acquire, PgExecutor, Postgres};
use taskqueue_task::Reference;
use thiserror::Error;
use tracing::info;

pub use sql::TASK_UPDATE_CHANNEL;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Error occured while parsing postgres version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("taskqueue requires PostgreSQL v12.0 or greater (detected `server_version_num` = {0})")]
    IncompatibleVersion(u32),
    #[error("Reference column '{0}' would overwrite a system column")]
    ReservedColumn(String),
    #[error("Reference '{0}' needs a name, a table, a column and a plain SQL type")]
    InvalidReference(String),
    #[error("Reference '{0}' is configured more than once")]
    DuplicateReference(String),
    #[error("Error occured while setting up tables: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Quotes an identifier for use in SQL
///
/// ```rust
/// assert_eq!(taskqueue_schema::quote_ident("tasks"), r#""tasks""#);
/// assert_eq!(taskqueue_schema::quote_ident(r#"we"ird"#), r#""we""ird""#);
/// ```
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a possibly schema qualified name, each part separately
pub fn quote_qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Creates the `schedules` and `tasks` tables with their indexes and the insert notification
/// trigger, then brings the reference columns of both tables in line with `references`.
///
/// Idempotent. Runs in a single transaction under an advisory lock so concurrent processes
/// starting at the same time don't race each other.
pub async fn setup_tables<'e, E>(
    executor: E,
    schema: &str,
    references: &[Reference],
) -> Result<(), SetupError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Clone,
{
    validate_references(references)?;
    let version = fetch_server_version(executor.clone()).await?;
    info!(pg_version = major_version(version), schema, "Setting up taskqueue tables");

    let escaped_schema = quote_ident(schema);
    let mut tx = executor.begin().await?;
    query("select pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("taskqueue_setup:{schema}"))
        .execute(tx.as_mut())
        .await?;

    execute_base_schema(&mut tx, &escaped_schema).await?;
    sync_reference_columns(&mut tx, schema, "schedules", SCHEDULE_COLUMNS, references).await?;
    sync_reference_columns(&mut tx, schema, "tasks", TASK_COLUMNS, references).await?;

    tx.commit().await?;
    info!(schema, references = references.len(), "taskqueue tables are ready");

    Ok(())
}
