//! The writer connection and the token that serializes access to it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::Connection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::commit::{ChangeOperation, RowChange};
use crate::error::{Error, Result};
use crate::transaction::{TransactionKind, pin_snapshot};

/// Row changes captured on the writer connection during the current transaction
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeBuffer(Arc<Mutex<Vec<RowChange>>>);

impl ChangeBuffer {
   fn push(&self, change: RowChange) {
      self.0.lock().push(change);
   }

   pub(crate) fn mark(&self) -> usize {
      self.0.lock().len()
   }

   pub(crate) fn truncate(&self, mark: usize) {
      self.0.lock().truncate(mark);
   }

   fn take(&self) -> Vec<RowChange> {
      std::mem::take(&mut *self.0.lock())
   }

   fn clear(&self) {
      self.0.lock().clear();
   }
}

/// Connection that runs write transactions (and, for the single-connection
/// manager, reads as well).
///
/// `in_transaction` is raised before `BEGIN` and lowered only after the
/// transaction ends cleanly. If an access future is dropped midway, the flag
/// stays raised and the next access rolls the abandoned transaction back.
pub(crate) struct WriterConnection {
   conn: SqliteConnection,
   changes: ChangeBuffer,
   in_transaction: bool,
   query_only: bool,
}

impl WriterConnection {
   pub(crate) async fn open(options: &SqliteConnectOptions) -> Result<Self> {
      let mut conn = SqliteConnection::connect_with(options).await?;
      let changes = ChangeBuffer::default();

      {
         let sink = changes.clone();
         let mut handle = conn.lock_handle().await?;
         handle.set_update_hook(move |result| {
            let Some(operation) = ChangeOperation::from_sqlite(result.operation) else {
               return;
            };
            let table = if result.database == "main" {
               result.table.to_string()
            } else {
               format!("{}.{}", result.database, result.table)
            };
            sink.push(RowChange {
               table,
               operation,
               rowid: result.rowid,
            });
         });
      }

      Ok(Self {
         conn,
         changes,
         in_transaction: false,
         query_only: false,
      })
   }

   /// Clears whatever an abandoned access left behind
   pub(crate) async fn prepare(&mut self) -> Result<()> {
      if self.in_transaction {
         warn!("Rolling back a transaction abandoned by a cancelled access");
         if let Err(e) = sqlx::query("ROLLBACK").execute(&mut self.conn).await {
            // SQLite may already have ended the transaction on its own
            debug!(error = %e, "Rollback of abandoned transaction failed");
         }
         self.in_transaction = false;
      }

      if self.query_only {
         sqlx::query("PRAGMA query_only = OFF")
            .execute(&mut self.conn)
            .await?;
         self.query_only = false;
      }

      self.changes.clear();
      Ok(())
   }

   pub(crate) async fn begin(&mut self, kind: TransactionKind) -> Result<()> {
      self.in_transaction = true;
      if let Err(e) = sqlx::query(kind.begin_statement())
         .execute(&mut self.conn)
         .await
      {
         self.in_transaction = false;
         return Err(e.into());
      }
      Ok(())
   }

   /// Commits and returns the row changes the transaction made
   pub(crate) async fn commit(&mut self) -> Result<Vec<RowChange>> {
      sqlx::query("COMMIT").execute(&mut self.conn).await?;
      self.in_transaction = false;
      Ok(self.changes.take())
   }

   pub(crate) async fn rollback(&mut self) -> Result<()> {
      sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
      self.in_transaction = false;
      self.changes.clear();
      Ok(())
   }

   /// Starts a read-only transaction with its snapshot taken immediately
   pub(crate) async fn begin_read_only(&mut self) -> Result<()> {
      self.query_only = true;
      sqlx::query("PRAGMA query_only = ON")
         .execute(&mut self.conn)
         .await?;
      self.begin(TransactionKind::Deferred).await?;
      pin_snapshot(&mut self.conn).await
   }

   pub(crate) async fn end_read_only(&mut self) -> Result<()> {
      if self.in_transaction {
         self.rollback().await?;
      }
      if self.query_only {
         sqlx::query("PRAGMA query_only = OFF")
            .execute(&mut self.conn)
            .await?;
         self.query_only = false;
      }
      Ok(())
   }

   pub(crate) fn parts(&mut self) -> (&mut SqliteConnection, &ChangeBuffer) {
      (&mut self.conn, &self.changes)
   }

   pub(crate) async fn close(self) -> Result<()> {
      self.conn.close().await?;
      Ok(())
   }
}

/// Exclusive hold on the writer slot. Owned, so it can be handed to a task
/// that outlives the access that acquired it.
pub(crate) type WriterGuard = OwnedMutexGuard<Option<WriterConnection>>;

/// The Writer Serialization Token.
///
/// Owns the writer connection behind a fair async mutex: waiters are served in
/// the order they asked, and at most one access holds the connection at a time.
/// The slot is emptied when the database closes.
pub(crate) struct WriterToken {
   slot: Arc<AsyncMutex<Option<WriterConnection>>>,
   acquire_timeout: Duration,
}

impl WriterToken {
   pub(crate) fn new(writer: WriterConnection, acquire_timeout: Duration) -> Self {
      Self {
         slot: Arc::new(AsyncMutex::new(Some(writer))),
         acquire_timeout,
      }
   }

   /// Waits for the token. Released when the returned guard is dropped.
   pub(crate) async fn acquire(&self) -> Result<WriterGuard> {
      tokio::time::timeout(self.acquire_timeout, Arc::clone(&self.slot).lock_owned())
         .await
         .map_err(|_| Error::TimedOut(self.acquire_timeout))
   }

   /// Waits for any in-flight access to finish, then closes the connection
   pub(crate) async fn close(&self) -> Result<()> {
      let writer = self.slot.lock().await.take();
      if let Some(writer) = writer {
         writer.close().await?;
      }
      Ok(())
   }
}
