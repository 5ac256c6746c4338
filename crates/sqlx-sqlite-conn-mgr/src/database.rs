//! SQLite database with one serialized writer and a pool of snapshot readers

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use sqlx::sqlite::{
   SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use tracing::{debug, trace};

use crate::access::{AccessKind, AccessScope, DatabaseAccess, ManagerId};
use crate::commit::{CommitEvent, CommitPublisher, HookId};
use crate::config::SqliteDatabaseConfig;
use crate::context::{Isolation, ReadContext, Snapshot, WriteContext};
use crate::error::{Error, Result};
use crate::registry;
use crate::transaction::{TransactionKind, finish_read, pin_snapshot, write_access};
use crate::writer::{WriterConnection, WriterToken};

/// SQLite database with a pool of concurrent readers and one exclusive writer.
///
/// ## Architecture
///
/// - **`writer`**: the single read-write connection, held by at most one write
///   access at a time and handed out in request order
/// - **`read_pool`**: read-only connections, opened on demand up to
///   `max_read_connections`
///
/// The database runs in WAL journal mode, so readers never wait on the writer.
/// Every read access pins a snapshot when it starts and keeps it until it ends:
/// writes that commit in the meantime stay invisible to it.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Connect (returns the existing instance if the file is already open)
/// 2. db.read(|ctx| ...)  -- any number at once, each on its own snapshot
/// 3. db.write(|ctx| ...) -- one at a time, one transaction each
/// 4. Close when done
/// ```
pub struct SqliteDatabase {
   id: ManagerId,

   /// Pool of read-only connections for concurrent reads
   read_pool: Pool<Sqlite>,

   /// Writer Serialization Token owning the read-write connection
   writer: WriterToken,

   /// Numbers commits and notifies commit handlers
   commits: Arc<CommitPublisher>,

   /// Marks database as closed to prevent further operations
   closed: AtomicBool,

   /// Absolute path to the database file
   path: PathBuf,
}

impl SqliteDatabase {
   /// Connect to the database at `path`, creating the file if needed.
   ///
   /// If a database manager for the same file is already open in this process,
   /// that instance is returned and `custom_config` is ignored. If the file is
   /// open as a [`SqliteQueue`](crate::SqliteQueue), this fails with
   /// [`Error::ManagerConflict`].
   pub async fn connect(
      path: impl AsRef<Path>,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Arc<Self>> {
      let config = custom_config.unwrap_or_default();
      registry::connect_shared(path.as_ref(), |path| Self::open(path, config)).await
   }

   async fn open(path: PathBuf, config: SqliteDatabaseConfig) -> Result<Arc<Self>> {
      // Readers rely on WAL, so the writer is opened first and switches the file over
      let write_options = SqliteConnectOptions::new()
         .filename(&path)
         .create_if_missing(true)
         .journal_mode(SqliteJournalMode::Wal)
         .synchronous(SqliteSynchronous::Normal)
         .busy_timeout(config.busy_timeout);
      let writer = WriterConnection::open(&write_options).await?;

      let read_options = SqliteConnectOptions::new()
         .filename(&path)
         .read_only(true)
         .busy_timeout(config.busy_timeout);
      let read_pool = SqlitePoolOptions::new()
         .max_connections(config.max_read_connections.max(1))
         .min_connections(0)
         .idle_timeout(config.idle_timeout)
         .acquire_timeout(config.acquire_timeout)
         .connect_lazy_with(read_options);

      debug!(
         path = %path.display(),
         max_read_connections = config.max_read_connections,
         "Opened pooled database"
      );

      Ok(Arc::new(Self {
         id: ManagerId::next(),
         read_pool,
         writer: WriterToken::new(writer, config.acquire_timeout),
         commits: Arc::new(CommitPublisher::spawn()),
         closed: AtomicBool::new(false),
         path,
      }))
   }

   /// Runs `work` on a pooled reader against a snapshot taken when the access
   /// starts.
   ///
   /// Waits for a reader if all `max_read_connections` are busy; fails with
   /// [`Error::ResourceExhausted`] if none frees up within the acquire timeout.
   /// The read transaction is always rolled back, and the connection returned
   /// to the pool, before this returns.
   pub async fn read<F, T, E>(&self, work: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + Send,
   {
      let scope = AccessScope::enter(self.id, AccessKind::Read)?;
      self.ensure_open()?;

      let mut conn = self
         .read_pool
         .acquire()
         .await
         .map_err(Error::reader_unavailable)?;

      // Read before the snapshot is taken, so it is a lower bound
      let commit_floor = self.commits.last_sequence();
      let mut tx = sqlx::Connection::begin(&mut *conn)
         .await
         .map_err(Error::from)?;
      pin_snapshot(&mut tx).await?;
      trace!(commit_floor, "Read snapshot pinned");

      let result = {
         let mut ctx = ReadContext::new(&mut tx, Snapshot::new(Isolation::Snapshot, commit_floor));
         scope.run(work(&mut ctx)).await
      };

      let released = tx.rollback().await.map_err(Error::from);
      finish_read(result, released)
   }

   /// Runs `work` in a write transaction on the writer connection.
   ///
   /// Waits, in request order, for any other write access to finish; fails with
   /// [`Error::TimedOut`] after the acquire timeout. Active readers are never
   /// blocked. Commits if `work` succeeds, otherwise rolls back and returns the
   /// failure unchanged.
   pub async fn write<F, T, E>(&self, work: F) -> std::result::Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send,
   {
      let scope = AccessScope::enter(self.id, AccessKind::Write)?;
      self.ensure_open()?;

      let slot = self.writer.acquire().await?;
      write_access(slot, TransactionKind::Immediate, &self.commits, scope, work).await
   }

   /// Registers a handler called once after each committed write access, in
   /// commit order. Handlers run on a background task, never while the writer
   /// is held.
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

   /// Number of reader connections currently open, busy or idle
   pub fn read_pool_size(&self) -> u32 {
      self.read_pool.size()
   }

   /// Number of reader connections waiting in the pool
   pub fn idle_readers(&self) -> usize {
      self.read_pool.num_idle()
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_closed(&self) -> bool {
      self.closed.load(Ordering::Acquire)
   }

   /// Close the database.
   ///
   /// New accesses fail with [`Error::DatabaseClosed`]. Accesses already running
   /// are allowed to finish first.
   pub async fn close(&self) -> Result<()> {
      if self.closed.swap(true, Ordering::AcqRel) {
         return Ok(());
      }

      registry::forget(&self.path, self).await;
      self.read_pool.close().await;
      self.writer.close().await?;

      debug!(path = %self.path.display(), "Closed pooled database");
      Ok(())
   }

   /// Close the database and delete its files
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

impl fmt::Debug for SqliteDatabase {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("SqliteDatabase")
         .field("path", &self.path)
         .field("read_pool", &self.read_pool)
         .field("closed", &self.is_closed())
         .finish_non_exhaustive()
   }
}

impl DatabaseAccess for SqliteDatabase {
   fn read<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + Send,
   {
      SqliteDatabase::read(self, work)
   }

   fn write<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send,
   {
      SqliteDatabase::write(self, work)
   }

   fn on_commit<H>(&self, handler: H) -> HookId
   where
      H: Fn(&CommitEvent) + Send + Sync + 'static,
   {
      SqliteDatabase::on_commit(self, handler)
   }

   fn remove_commit_hook(&self, id: HookId) -> bool {
      SqliteDatabase::remove_commit_hook(self, id)
   }

   fn path(&self) -> &Path {
      &self.path
   }
}
