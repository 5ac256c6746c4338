//! # sqlx-sqlite-toolkit
//!
//! JSON in, JSON out on top of [`sqlx_sqlite_conn_mgr`].
//!
//! - [`statements`]: composable helpers that run inside an access the caller
//!   already holds, taking a [`WriteContext`](sqlx_sqlite_conn_mgr::WriteContext)
//!   or any [`ExecutionContext`](sqlx_sqlite_conn_mgr::ExecutionContext)
//! - [`DatabaseWrapper`]: one-call operations, each running exactly one access
//! - [`decode::to_json`]: SQLite value to JSON conversion
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use sqlx_sqlite_conn_mgr::SqliteDatabase;
//! use sqlx_sqlite_toolkit::{Error, statements};
//!
//! # async fn example() -> Result<(), Error> {
//! let db = SqliteDatabase::connect("bank.db", None).await?;
//!
//! // Debit and credit commit together or not at all
//! db.write(|ctx| {
//!    Box::pin(async move {
//!       statements::execute(ctx, "UPDATE accounts SET balance = balance - $1 WHERE id = $2", vec![json!(10), json!("A")]).await?;
//!       statements::execute(ctx, "UPDATE accounts SET balance = balance + $1 WHERE id = $2", vec![json!(10), json!("B")]).await?;
//!       Ok::<_, Error>(())
//!    })
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod decode;
mod error;
pub mod statements;
mod wrapper;

pub use error::{Error, Result};
pub use statements::{JsonRow, Statement, WriteQueryResult, bind_value};
pub use wrapper::DatabaseWrapper;
