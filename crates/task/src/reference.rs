use getset::Getters;
use serde::{Deserialize, Serialize};

/// A caller owned foreign key added to both the `tasks` and `schedules` tables.
///
/// Rows are deleted with `ON DELETE CASCADE` when the referenced row goes away.
///
/// ```rust
/// use taskqueue_task::Reference;
///
/// let reference = Reference::new("organization_id", "organizations", "id", "uuid");
/// assert_eq!(reference.name(), "organization_id");
/// assert_eq!(reference.sql_type(), "uuid");
/// ```
#[derive(Getters, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct Reference {
    /// Column name on both tables
    name: String,
    /// Referenced table, may be schema qualified with a dot
    table: String,
    /// Referenced column
    column: String,
    /// SQL type of the column, values are cast to it from text
    sql_type: String,
}

impl Reference {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        sql_type: impl Into<String>,
    ) -> Self {
        Reference {
            name: name.into(),
            table: table.into(),
            column: column.into(),
            sql_type: sql_type.into(),
        }
    }
}
