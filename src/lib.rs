//! # sqlite-access
//!
//! One entry point for the two ways of sharing a SQLite file in this workspace:
//!
//! - **Queue**: a single connection; every access, read or write, runs alone
//!   ([`SqliteQueue`])
//! - **Pool**: one writer plus WAL readers; reads run on their own snapshot while
//!   writes proceed ([`SqliteDatabase`])
//!
//! Pick one with [`AccessConfig`] and [`connect`]; both sit behind
//! [`AnyDatabase`], which implements [`DatabaseAccess`] so code written against
//! the trait does not care which strategy is in use.
//!
//! ```no_run
//! use sqlite_access::{AccessConfig, DatabaseAccess, Error, connect};
//!
//! # async fn example() -> Result<(), Error> {
//! let db = connect("app.db", AccessConfig::default()).await?;
//!
//! db.write(|ctx| {
//!    Box::pin(async move {
//!       sqlx::query("CREATE TABLE IF NOT EXISTS notes (body TEXT)")
//!          .execute(&mut **ctx)
//!          .await?;
//!       Ok::<_, Error>(())
//!    })
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

pub use sqlx;
pub use sqlx_sqlite_conn_mgr::{
   AccessKind, BoxFuture, ChangeOperation, CommitEvent, DatabaseAccess, Error, ExecutionContext,
   HookId, Isolation, ReadContext, Result, RowChange, Snapshot, SqliteDatabase,
   SqliteDatabaseConfig, SqliteQueue, SqliteQueueConfig, WriteContext,
};
pub use sqlx_sqlite_observer as observer;
pub use sqlx_sqlite_toolkit as toolkit;

/// Which connection strategy to open a database with.
///
/// Deserializes from a tagged object, e.g.
/// `{ "strategy": "pool", "max_read_connections": 4 }` or
/// `{ "strategy": "queue" }`. Omitted settings take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum AccessConfig {
   Queue(SqliteQueueConfig),
   Pool(SqliteDatabaseConfig),
}

impl Default for AccessConfig {
   fn default() -> Self {
      AccessConfig::Pool(SqliteDatabaseConfig::default())
   }
}

/// A database opened under either strategy.
#[derive(Clone)]
pub enum AnyDatabase {
   Queue(Arc<SqliteQueue>),
   Pool(Arc<SqliteDatabase>),
}

/// Open the database at `path` with the chosen strategy.
///
/// Returns the already open instance if the file is open under the same
/// strategy in this process; fails with [`Error::ManagerConflict`] if it is
/// open under the other one.
pub async fn connect(path: impl AsRef<Path>, config: AccessConfig) -> Result<AnyDatabase> {
   let path = path.as_ref();
   let db = match config {
      AccessConfig::Queue(config) => AnyDatabase::Queue(SqliteQueue::connect(path, Some(config)).await?),
      AccessConfig::Pool(config) => AnyDatabase::Pool(SqliteDatabase::connect(path, Some(config)).await?),
   };

   debug!(path = %path.display(), strategy = db.strategy(), "Database ready");
   Ok(db)
}

impl AnyDatabase {
   /// `"queue"` or `"pool"`
   pub fn strategy(&self) -> &'static str {
      match self {
         AnyDatabase::Queue(_) => "queue",
         AnyDatabase::Pool(_) => "pool",
      }
   }

   /// Sequence number of the most recent committed write access (0 if none)
   pub fn last_commit(&self) -> u64 {
      match self {
         AnyDatabase::Queue(db) => db.last_commit(),
         AnyDatabase::Pool(db) => db.last_commit(),
      }
   }

   pub fn is_closed(&self) -> bool {
      match self {
         AnyDatabase::Queue(db) => db.is_closed(),
         AnyDatabase::Pool(db) => db.is_closed(),
      }
   }

   /// Close the database once running accesses finish
   pub async fn close(&self) -> Result<()> {
      match self {
         AnyDatabase::Queue(db) => db.close().await,
         AnyDatabase::Pool(db) => db.close().await,
      }
   }

   /// Close the database and delete its files
   pub async fn remove(&self) -> Result<()> {
      match self {
         AnyDatabase::Queue(db) => db.remove().await,
         AnyDatabase::Pool(db) => db.remove().await,
      }
   }
}

impl DatabaseAccess for AnyDatabase {
   fn read<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + Send,
   {
      async move {
         match self {
            AnyDatabase::Queue(db) => db.read(work).await,
            AnyDatabase::Pool(db) => db.read(work).await,
         }
      }
   }

   fn write<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send,
   {
      async move {
         match self {
            AnyDatabase::Queue(db) => db.write(work).await,
            AnyDatabase::Pool(db) => db.write(work).await,
         }
      }
   }

   fn on_commit<H>(&self, handler: H) -> HookId
   where
      H: Fn(&CommitEvent) + Send + Sync + 'static,
   {
      match self {
         AnyDatabase::Queue(db) => db.on_commit(handler),
         AnyDatabase::Pool(db) => db.on_commit(handler),
      }
   }

   fn remove_commit_hook(&self, id: HookId) -> bool {
      match self {
         AnyDatabase::Queue(db) => db.remove_commit_hook(id),
         AnyDatabase::Pool(db) => db.remove_commit_hook(id),
      }
   }

   fn path(&self) -> &Path {
      match self {
         AnyDatabase::Queue(db) => db.path(),
         AnyDatabase::Pool(db) => db.path(),
      }
   }
}

impl fmt::Debug for AnyDatabase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         AnyDatabase::Queue(db) => f.debug_tuple("Queue").field(&db.path()).finish(),
         AnyDatabase::Pool(db) => f.debug_tuple("Pool").field(db).finish(),
      }
   }
}
