//! Statements shared by several ingestors.

pub(crate) const DISABLE_FOREIGN_KEY_CHECKS: &str = "SET FOREIGN_KEY_CHECKS = 0";
pub(crate) const ENABLE_FOREIGN_KEY_CHECKS: &str = "SET FOREIGN_KEY_CHECKS = 1";

/// `INSERT INTO <table> (<columns>) VALUES (?, ...)`.
pub(crate) fn insert_statement(table: &str, columns: &[String]) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    )
}

pub(crate) fn analyze_statement(table: &str) -> String {
    format!("ANALYZE TABLE {table}")
}
