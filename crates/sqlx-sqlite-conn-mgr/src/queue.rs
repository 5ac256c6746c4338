//! SQLite database behind a single connection

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteConnectOptions;
use tracing::debug;

use crate::access::{AccessKind, AccessScope, DatabaseAccess, ManagerId};
use crate::commit::{CommitEvent, CommitPublisher, HookId};
use crate::config::SqliteQueueConfig;
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::registry;
use crate::transaction::{TransactionKind, serialized_read_access, write_access};
use crate::writer::{WriterConnection, WriterToken};

/// SQLite database that funnels every access, read or write, through one
/// connection.
///
/// Accesses never overlap: each waits its turn (FIFO) for the connection. Reads
/// run in a read-only transaction, writes in an exclusive transaction.
pub struct SqliteQueue {
   id: ManagerId,
   connection: WriterToken,
   commits: Arc<CommitPublisher>,
   closed: AtomicBool,
   path: PathBuf,
}

impl SqliteQueue {
   /// Connect to the database at `path`, creating the file if needed.
   ///
   /// Returns the existing instance if the file is already open as a queue in
   /// this process; fails with [`Error::ManagerConflict`] if it is open as a
   /// [`SqliteDatabase`](crate::SqliteDatabase).
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteQueueConfig>,
   ) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      registry::connect_shared(path.as_ref(), |path| Self::open(path, config)).await
   }

   async fn open(path: PathBuf, config: SqliteQueueConfig) -> Result<Arc<Self>> {
      let options = SqliteConnectOptions::new()
         .filename(&path)
         .create_if_missing(true)
         .busy_timeout(config.busy_timeout);
      let connection = WriterConnection::open(&options).await?;

      debug!(path = %path.display(), "Opened database queue");

      Ok(Arc::new(Self {
         id: ManagerId::next(),
         connection: WriterToken::new(connection, config.acquire_timeout),
         commits: Arc::new(CommitPublisher::spawn()),
         closed: AtomicBool::new(false),
         path,
      }))
   }

   /// Runs `work` in a read-only transaction once the connection is free
   pub async fn read<F, T, E>(&self, work: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + Send,
   {
      let scope = AccessScope::enter(self.id, AccessKind::Read)?;
      self.ensure_open()?;

      let mut slot = self.connection.acquire().await?;
      let connection = slot.as_mut().ok_or(Error::DatabaseClosed)?;
      serialized_read_access(connection, &self.commits, scope, work).await
   }

   /// Runs `work` in a write transaction once the connection is free
   pub async fn write<F, T, E>(&self, work: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send,
   {
      let scope = AccessScope::enter(self.id, AccessKind::Write)?;
      self.ensure_open()?;

      let slot = self.connection.acquire().await?;
      // No WAL here, so the write lock is taken in full at BEGIN
      write_access(slot, TransactionKind::Exclusive, &self.commits, scope, work).await
   }

   pub fn on_commit<H>(&self, handler: H) -> HookId
   where
      H: Fn(&CommitEvent) + Send + Sync + 'static,
   {
      self.commits.register(handler)
   }

   pub fn remove_commit_hook(&self, id: HookId) -> bool {
      self.commits.unregister(id)
   }

   /// Sequence number of the most recent committed write access (0 if none)
   pub fn last_commit(&self) -> u64 {
      self.commits.last_sequence()
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Close the queue once any running access finishes
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }

      registry::forget(&self.path, self).await;
      self.connection.close().await?;

      debug!(path = %self.path.display(), "Closed database queue");
      Ok(())
   }

   /// Close the queue and delete the database files
   pub async fn remove(&self) -> Result<()> {
      self.close().await?;
      registry::remove_database_files(&self.path).await
   }

   fn ensure_open(&self) -> Result<()> {
      if self.is_closed() {
         return Err(Error::DatabaseClosed);
      }
      Ok(())
   }
}

impl fmt::Debug for SqliteQueue {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("SqliteQueue")
         .field("path", &self.path)
         .field("closed", &self.is_closed())
         .finish_non_exhaustive()
   }
}

impl DatabaseAccess for SqliteQueue {
   fn read<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + Send,
   {
      SqliteQueue::read(self, work)
   }

   fn write<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send,
   {
      SqliteQueue::write(self, work)
   }

   fn on_commit<H>(&self, handler: H) -> HookId
   where
      H: Fn(&CommitEvent) + Send + Sync + 'static,
   {
      SqliteQueue::on_commit(self, handler)
   }

   fn remove_commit_hook(&self, id: HookId) -> bool {
      SqliteQueue::remove_commit_hook(self, id)
   }

   fn path(&self) -> &Path {
      &self.path
   }
}
