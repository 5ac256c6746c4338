//! Observation of databases managed by `sqlx-sqlite-conn-mgr`.
//!
//! Row changes are captured by the manager itself and delivered through its
//! commit hook, so only committed changes are ever published and they arrive in
//! commit order. Reads are unaffected.
//!
//! # Example
//!
//! ```no_run
//! use sqlx_sqlite_conn_mgr::{Error, SqliteDatabase};
//! use sqlx_sqlite_observer::{ObservableDatabase, ObserverConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let db = SqliteDatabase::connect("mydb.db", None).await?;
//!    let observable = ObservableDatabase::new(db, ObserverConfig::new().with_tables(["users"]));
//!    observable.verify_tables().await?;
//!
//!    let mut rx = observable.subscribe(["users"]);
//!
//!    observable
//!       .inner()
//!       .write(|ctx| {
//!          Box::pin(async move {
//!             sqlx::query("INSERT INTO users (name) VALUES (?)")
//!                .bind("Alice")
//!                .execute(&mut **ctx)
//!                .await?;
//!             Ok::<_, Error>(())
//!          })
//!       })
//!       .await?;
//!
//!    // Published once the write access commits
//!    let change = rx.recv().await?;
//!    println!("{} row {} in {}", change.table, change.rowid, change.commit_sequence);
//!
//!    Ok(())
//! }
//! ```

use std::sync::Arc;

use sqlx_sqlite_conn_mgr::{DatabaseAccess, HookId};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::Result;
use crate::broker::ObservationBroker;
use crate::change::TableChange;
use crate::config::ObserverConfig;
use crate::error::Error;
use crate::schema::query_table_info;
use crate::stream::{TableChangeStream, TableChangeStreamExt};

/// Unregisters the commit hook once the last observable clone is gone.
struct HookRegistration<D: DatabaseAccess> {
   db: Arc<D>,
   id: HookId,
}

impl<D: DatabaseAccess> Drop for HookRegistration<D> {
   fn drop(&mut self) {
      if self.db.remove_commit_hook(self.id) {
         debug!(path = %self.db.path().display(), "Commit hook for observer removed");
      }
   }
}

/// Wrapper around a database manager that publishes committed changes to
/// observed tables.
///
/// Works with any [`DatabaseAccess`] implementation. Clones share subscribers
/// and the observed table set.
pub struct ObservableDatabase<D: DatabaseAccess> {
   registration: Arc<HookRegistration<D>>,
   broker: Arc<ObservationBroker>,
}

impl<D: DatabaseAccess> ObservableDatabase<D> {
   /// Create a new observable database wrapper.
   ///
   /// # Arguments
   ///
   /// * `db` - The database manager to observe
   /// * `config` - Observer configuration specifying which tables to track
   pub fn new(db: Arc<D>, config: ObserverConfig) -> Self {
      let broker = ObservationBroker::new(config.channel_capacity);

      if !config.tables.is_empty() {
         broker.observe_tables(config.tables.iter().map(String::as_str));
      }

      let hook_broker = Arc::clone(&broker);
      let id = db.on_commit(move |event| {
         hook_broker.publish(event);
      });

      Self {
         registration: Arc::new(HookRegistration { db, id }),
         broker,
      }
   }

   /// Subscribe to change notifications.
   ///
   /// The given tables are added to the observed set. The receiver gets
   /// changes for every observed table; use [`subscribe_stream`](Self::subscribe_stream)
   /// to only see the tables asked for.
   pub fn subscribe<I, S>(&self, tables: I) -> broadcast::Receiver<TableChange>
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      let tables: Vec<String> = tables.into_iter().map(Into::into).collect();
      self
         .broker
         .observe_tables(tables.iter().map(String::as_str));
      self.broker.subscribe()
   }

   /// Subscribe and get a `Stream` limited to `tables` (or every observed
   /// table if `tables` is empty).
   pub fn subscribe_stream<I, S>(&self, tables: I) -> TableChangeStream
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      let tables: Vec<String> = tables.into_iter().map(Into::into).collect();
      self
         .broker
         .observe_tables(tables.iter().map(String::as_str));
      self.broker.subscribe().into_stream().filter_tables(tables)
   }

   /// Checks every observed table against the schema in one read access.
   ///
   /// Missing tables are only logged since they may be created later. Fails
   /// with [`Error::UnobservableTable`] for the first table that SQLite will
   /// never report changes for.
   pub async fn verify_tables(&self) -> Result<()> {
      let tables = self.broker.get_observed_tables();

      let infos = self
         .registration
         .db
         .read(move |ctx| {
            Box::pin(async move {
               let mut infos = Vec::with_capacity(tables.len());
               for table in tables {
                  match query_table_info(ctx, &table).await? {
                     Some(info) => infos.push(info),
                     None => warn!(table = %table, "Observed table not found in schema"),
                  }
               }
               Ok::<_, Error>(infos)
            })
         })
         .await?;

      match infos.into_iter().find(|info| !info.is_observable()) {
         Some(info) => Err(Error::UnobservableTable(info.name)),
         None => Ok(()),
      }
   }

   /// Get the underlying database manager.
   pub fn inner(&self) -> &Arc<D> {
      &self.registration.db
   }

   /// Get the list of currently observed tables.
   pub fn observed_tables(&self) -> Vec<String> {
      self.broker.get_observed_tables()
   }

   /// Returns a reference to the underlying observation broker.
   pub fn broker(&self) -> &Arc<ObservationBroker> {
      &self.broker
   }
}

impl<D: DatabaseAccess> Clone for ObservableDatabase<D> {
   fn clone(&self) -> Self {
      Self {
         registration: Arc::clone(&self.registration),
         broker: Arc::clone(&self.broker),
      }
   }
}
