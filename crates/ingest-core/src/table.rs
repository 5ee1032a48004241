//! Destination table descriptors.

use std::fmt;

/// Delete statement sentinel that disables clearing the destination.
pub const NO_DELETE: &str = "nodelete";

/// How the destination table is cleared before loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClearPolicy {
    /// `TRUNCATE TABLE <table>`.
    #[default]
    Truncate,
    /// Leave existing rows in place.
    Keep,
    /// Run the given statement verbatim.
    Delete(String),
}

impl ClearPolicy {
    /// Map a legacy delete statement: `None` truncates, `"nodelete"` keeps
    /// existing rows, anything else is executed as-is.
    pub fn from_delete_statement(statement: Option<&str>) -> Self {
        match statement {
            None => ClearPolicy::Truncate,
            Some(NO_DELETE) => ClearPolicy::Keep,
            Some(sql) => ClearPolicy::Delete(sql.to_string()),
        }
    }

    /// Statement that implements the policy, `None` for [`ClearPolicy::Keep`].
    pub fn statement(&self, table: &str) -> Option<String> {
        match self {
            ClearPolicy::Truncate => Some(format!("TRUNCATE TABLE {table}")),
            ClearPolicy::Keep => None,
            ClearPolicy::Delete(sql) => Some(sql.clone()),
        }
    }
}

/// A table name, optionally qualified with its schema (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn parse(name: &str) -> Self {
        match name.split_once('.') {
            Some((schema, table)) => Self {
                schema: Some(schema.to_string()),
                table: table.to_string(),
            },
            None => Self {
                schema: None,
                table: name.to_string(),
            },
        }
    }

    /// Schema of the table, falling back to `default_schema` for
    /// unqualified names.
    pub fn schema_or<'a>(&'a self, default_schema: &'a str) -> &'a str {
        self.schema.as_deref().unwrap_or(default_schema)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}
