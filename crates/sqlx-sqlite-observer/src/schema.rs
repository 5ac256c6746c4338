//! Schema checks for observed tables.
//!
//! Row changes are reported through SQLite's update hook, which is never
//! invoked for tables created `WITHOUT ROWID`. Such tables are detected up
//! front so callers do not silently wait for notifications that never come.

use std::sync::OnceLock;

use regex::Regex;
use sqlx_sqlite_conn_mgr::ExecutionContext;

/// Schema information for an observed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
   pub name: String,
   /// True if the table was created with `WITHOUT ROWID`
   pub without_rowid: bool,
}

impl TableInfo {
   /// Whether committed changes to this table produce notifications
   pub fn is_observable(&self) -> bool {
      !self.without_rowid
   }
}

/// Looks up a table in the schema.
///
/// Returns `None` if the table doesn't exist. Views and virtual tables are
/// not tables here and also yield `None`.
pub async fn query_table_info<C: ExecutionContext>(
   ctx: &mut C,
   table_name: &str,
) -> crate::Result<Option<TableInfo>> {
   let row: Option<(Option<String>,)> =
      sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1")
         .bind(table_name)
         .fetch_optional(ctx.connection())
         .await?;

   Ok(row.map(|(create_sql,)| TableInfo {
      name: table_name.to_string(),
      without_rowid: create_sql.as_deref().is_some_and(has_without_rowid_clause),
   }))
}

/// Checks if a CREATE TABLE statement ends with WITHOUT ROWID.
///
/// Anchored to the end of the statement, after the closing parenthesis, so
/// string literals and comments mentioning WITHOUT ROWID do not match.
fn has_without_rowid_clause(create_sql: &str) -> bool {
   static RE: OnceLock<Regex> = OnceLock::new();
   let re = RE.get_or_init(|| {
      // Also accepts the STRICT option in either order
      Regex::new(r"(?i)\)\s*(STRICT\s*,\s*)?WITHOUT\s+ROWID(\s*,\s*STRICT)?\s*;?\s*$")
         .expect("invalid regex")
   });
   re.is_match(create_sql)
}
