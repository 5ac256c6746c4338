use std::time::Instant;

pub use sqlx_sqlite_conn_mgr::ChangeOperation;

/// Notification of one committed row change in an observed table.
///
/// Changes are only sent after the write access that made them commits, in
/// commit order. Changes from one commit share a `commit_sequence`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChange {
   pub table: String,
   pub operation: ChangeOperation,
   /// The SQLite rowid of the affected row
   pub rowid: i64,
   /// Sequence number of the commit this change belongs to
   pub commit_sequence: u64,
   pub timestamp: Instant,
}

/// Item yielded by [`TableChangeStream`](crate::TableChangeStream).
#[derive(Debug, Clone, PartialEq)]
pub enum TableChangeEvent {
   Change(TableChange),
   /// The subscriber fell behind and this many changes were dropped
   Lagged(u64),
}
