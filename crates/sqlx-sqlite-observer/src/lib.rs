//! # sqlx-sqlite-observer
//!
//! Per-table change notifications for SQLite databases managed by
//! [`sqlx_sqlite_conn_mgr`]. Subscribers receive one [`TableChange`] per row
//! changed in an observed table, only after the write access that changed it
//! commits, and in commit order.
//!
//! ## Core Types
//!
//! - **[`ObservableDatabase`]**: wraps a manager and registers its commit hook
//! - **[`ObserverConfig`]**: tables to observe and channel capacity
//! - **[`TableChangeStream`]**: `Stream` of [`TableChangeEvent`]s with table filtering
//! - **[`Error`]**: error type for observation operations
//!
//! ## Limitations
//!
//! Tables created `WITHOUT ROWID` produce no notifications;
//! [`ObservableDatabase::verify_tables`] reports them.

mod broker;
mod change;
mod config;
mod error;
mod observable;
mod schema;
mod stream;

pub use broker::ObservationBroker;
pub use change::{ChangeOperation, TableChange, TableChangeEvent};
pub use config::{DEFAULT_CHANNEL_CAPACITY, ObserverConfig};
pub use error::{Error, Result};
pub use observable::ObservableDatabase;
pub use schema::{TableInfo, query_table_info};
pub use stream::{TableChangeStream, TableChangeStreamExt};
