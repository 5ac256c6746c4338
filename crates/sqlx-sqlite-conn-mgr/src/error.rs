//! Error types for sqlx-sqlite-conn-mgr

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::access::AccessKind;

/// `SQLITE_BUSY`
const SQLITE_BUSY: i32 = 5;
/// `SQLITE_LOCKED`
const SQLITE_LOCKED: i32 = 6;
/// `SQLITE_SCHEMA`
const SQLITE_SCHEMA: i32 = 17;
/// `SQLITE_BUSY_SNAPSHOT`: a WAL read snapshot can no longer be upgraded or served
const SQLITE_BUSY_SNAPSHOT: i32 = SQLITE_BUSY | (2 << 8);

/// Errors that may occur when working with sqlx-sqlite-conn-mgr
#[derive(Error, Debug)]
pub enum Error {
   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// Error from the sqlx library that has no more specific classification
   #[error("Sqlx error: {0}")]
   Sqlx(#[source] sqlx::Error),

   /// Database has been closed and cannot be used
   #[error("Database has been closed")]
   DatabaseClosed,

   /// Another connection, usually in another process, holds a conflicting lock.
   /// Never retried here; retry policy belongs to the caller.
   #[error("Database is busy or locked: {0}")]
   Busy(#[source] sqlx::Error),

   /// A top-level access was requested from inside an access that is already
   /// open on the same database
   #[error("{requested} access requested while a {active} access is already open on this database")]
   Reentrancy {
      active: AccessKind,
      requested: AccessKind,
   },

   /// No reader connection could be obtained: the pool stayed at capacity until
   /// the wait timeout elapsed, or opening a new connection failed
   #[error("No reader connection available: {0}")]
   ResourceExhausted(#[source] sqlx::Error),

   /// Waiting for the writer exceeded the configured acquire timeout
   #[error("Timed out after {0:?} waiting for write access")]
   TimedOut(Duration),

   /// A read snapshot could not be served consistently because the database
   /// file changed underneath it
   #[error("Read snapshot is no longer valid: {0}")]
   Stale(#[source] sqlx::Error),

   /// Transaction failed and rollback also failed
   #[error("Transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// The database file is already open under the other connection strategy
   #[error("Database {} is already managed by a different connection strategy", .0.display())]
   ManagerConflict(PathBuf),

   /// Failure raised by a unit of work that uses this error type
   #[error("{0}")]
   Work(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
   /// Wraps an arbitrary failure raised inside a unit of work
   pub fn work(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
      Error::Work(error.into())
   }

   /// Maps a failure to obtain a reader connection
   pub(crate) fn reader_unavailable(error: sqlx::Error) -> Self {
      match error {
         sqlx::Error::PoolClosed => Error::DatabaseClosed,
         other => Error::ResourceExhausted(other),
      }
   }

   /// Machine-readable error code
   pub fn error_code(&self) -> &'static str {
      match self {
         Error::Io(_) => "IO_ERROR",
         Error::Sqlx(_) => "SQLX_ERROR",
         Error::DatabaseClosed => "DATABASE_CLOSED",
         Error::Busy(_) => "BUSY",
         Error::Reentrancy { .. } => "REENTRANCY",
         Error::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
         Error::TimedOut(_) => "TIMED_OUT",
         Error::Stale(_) => "STALE_SNAPSHOT",
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED",
         Error::ManagerConflict(_) => "MANAGER_CONFLICT",
         Error::Work(_) => "WORK_FAILURE",
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineCondition {
   Busy,
   Stale,
}

/// Classifies an SQLite extended result code
fn classify_code(code: i32) -> Option<EngineCondition> {
   if code == SQLITE_BUSY_SNAPSHOT || code == SQLITE_SCHEMA {
      return Some(EngineCondition::Stale);
   }

   match code & 0xff {
      SQLITE_BUSY | SQLITE_LOCKED => Some(EngineCondition::Busy),
      _ => None,
   }
}

impl From<sqlx::Error> for Error {
   fn from(error: sqlx::Error) -> Self {
      let condition = error
         .as_database_error()
         .and_then(|db_err| db_err.code())
         .and_then(|code| code.parse::<i32>().ok())
         .and_then(classify_code);

      match (condition, error) {
         (Some(EngineCondition::Busy), error) => Error::Busy(error),
         (Some(EngineCondition::Stale), error) => Error::Stale(error),
         (None, sqlx::Error::PoolTimedOut) => Error::ResourceExhausted(sqlx::Error::PoolTimedOut),
         (None, sqlx::Error::PoolClosed) => Error::DatabaseClosed,
         (None, error) => Error::Sqlx(error),
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
