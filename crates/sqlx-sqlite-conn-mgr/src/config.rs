//! Configuration for the single-connection and pooled database managers

use std::time::Duration;

use serde::Deserialize;

/// Configuration for [`SqliteDatabase`](crate::SqliteDatabase) connection pools
///
/// # Examples
///
/// ```
/// use sqlx_sqlite_conn_mgr::SqliteDatabaseConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = SqliteDatabaseConfig::default();
///
/// // Override just the fields you care about
/// let config = SqliteDatabaseConfig {
///     max_read_connections: 3,
///     acquire_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteDatabaseConfig {
   /// Maximum number of concurrent read connections
   ///
   /// Reader connections are opened lazily, up to this many. A read access that
   /// finds every reader checked out waits (FIFO) for one to be released.
   ///
   /// Default: 6
   pub max_read_connections: u32,

   /// Idle timeout for reader connections
   ///
   /// Readers that sit unused in the pool for this long are closed. A reader that
   /// is serving an access is never closed by this timeout.
   ///
   /// Default: 30 seconds
   pub idle_timeout: Duration,

   /// Upper bound on waiting for the writer or for a reader connection
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,

   /// How long SQLite itself waits on a lock held by another process before
   /// reporting `SQLITE_BUSY`
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,
}

impl Default for SqliteDatabaseConfig {
   fn default() -> Self {
      Self {
         max_read_connections: 6,
         idle_timeout: Duration::from_secs(30),
         acquire_timeout: Duration::from_secs(30),
         busy_timeout: Duration::from_secs(5),
      }
   }
}

/// Configuration for [`SqliteQueue`](crate::SqliteQueue)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteQueueConfig {
   /// Upper bound on waiting for the connection
   ///
   /// Default: 30 seconds
   pub acquire_timeout: Duration,

   /// How long SQLite waits on a lock held by another process
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,
}

impl Default for SqliteQueueConfig {
   fn default() -> Self {
      Self {
         acquire_timeout: Duration::from_secs(30),
         busy_timeout: Duration::from_secs(5),
      }
   }
}
