//! Error types for the sqlx-sqlite-observer crate.

/// Errors that can occur during observation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the underlying connection manager.
   #[error(transparent)]
   ConnMgr(#[from] sqlx_sqlite_conn_mgr::Error),

   /// SQLx database error.
   #[error("Database error: {0}")]
   Sqlx(#[from] sqlx::Error),

   /// SQLite does not report row changes for tables created `WITHOUT ROWID`.
   #[error("Table '{0}' is declared WITHOUT ROWID and cannot be observed")]
   UnobservableTable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
