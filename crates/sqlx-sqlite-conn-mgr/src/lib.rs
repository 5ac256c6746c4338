//! # sqlx-sqlite-conn-mgr
//!
//! Concurrency control for one SQLite database file on top of SQLx: callers hand
//! a unit of work to [`read`](DatabaseAccess::read) or
//! [`write`](DatabaseAccess::write) and never manage locks, transactions, or
//! connections themselves.
//!
//! ## Core Types
//!
//! - **[`SqliteQueue`]**: one connection; every access, read or write, runs alone
//! - **[`SqliteDatabase`]**: one writer plus a pool of WAL readers; reads run
//!   concurrently with each other and with the writer, each on its own snapshot
//! - **[`DatabaseAccess`]**: the contract both implement
//! - **[`ReadContext`]** / **[`WriteContext`]**: what a unit of work receives
//! - **[`CommitEvent`]**: what commit handlers receive
//! - **[`Error`]**: error type for database operations
//!
//! ## Guarantees
//!
//! - **One writer**: at most one write access runs at a time per file, served in
//!   request order
//! - **All or nothing**: a write access commits everything its work did, or
//!   rolls all of it back and returns the work's error
//! - **Stable reads**: a read access never sees part of a write
//! - **Ordered notifications**: commit handlers run once per committed write,
//!   in commit order, after the writer has moved on
//!
//! ## Example
//!
//! ```no_run
//! use sqlx_sqlite_conn_mgr::{Error, SqliteDatabase};
//!
//! # async fn example() -> Result<(), Error> {
//! let db = SqliteDatabase::connect("bank.db", None).await?;
//!
//! // Both rows commit together or not at all
//! db.write(|ctx| {
//!    Box::pin(async move {
//!       sqlx::query("UPDATE accounts SET balance = balance - 10 WHERE id = 'A'")
//!          .execute(&mut **ctx)
//!          .await?;
//!       sqlx::query("UPDATE accounts SET balance = balance + 10 WHERE id = 'B'")
//!          .execute(&mut **ctx)
//!          .await?;
//!       Ok::<_, Error>(())
//!    })
//! })
//! .await?;
//!
//! let total: i64 = db
//!    .read(|ctx| {
//!       Box::pin(async move {
//!          let total = sqlx::query_scalar("SELECT SUM(balance) FROM accounts")
//!             .fetch_one(&mut **ctx)
//!             .await?;
//!          Ok::<_, Error>(total)
//!       })
//!    })
//!    .await?;
//! # Ok(())
//! # }
//! ```

mod access;
mod commit;
mod config;
mod context;
mod database;
mod error;
mod queue;
mod registry;
mod transaction;
mod writer;

// Re-export public types
pub use access::{AccessKind, DatabaseAccess};
pub use commit::{ChangeOperation, CommitEvent, HookId, RowChange};
pub use config::{SqliteDatabaseConfig, SqliteQueueConfig};
pub use context::{ExecutionContext, Isolation, ReadContext, Snapshot, WriteContext};
pub use database::SqliteDatabase;
pub use error::{Error, Result};
pub use queue::SqliteQueue;

pub use futures::future::BoxFuture;
