//! The access contract shared by both connection strategies, and detection of
//! re-entrant top-level accesses.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;

use crate::commit::{CommitEvent, HookId};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};

/// Kind of an access to the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
   Read,
   Write,
}

impl fmt::Display for AccessKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         AccessKind::Read => f.write_str("read"),
         AccessKind::Write => f.write_str("write"),
      }
   }
}

/// Read and write access to one database file.
///
/// Implemented by [`SqliteQueue`](crate::SqliteQueue) (one connection, fully
/// serial) and [`SqliteDatabase`](crate::SqliteDatabase) (one writer plus a
/// pool of snapshot-isolated readers). Code written against this trait works
/// with either strategy.
///
/// A unit of work receives a context and returns a boxed future, the same
/// shape as [`sqlx::Connection::transaction`]:
///
/// ```no_run
/// # use sqlx_sqlite_conn_mgr::{DatabaseAccess, Error};
/// # async fn example(db: &impl DatabaseAccess) -> Result<(), Error> {
/// let count: i64 = db
///    .read(|ctx| {
///       Box::pin(async move {
///          let n = sqlx::query_scalar("SELECT COUNT(*) FROM users")
///             .fetch_one(&mut **ctx)
///             .await?;
///          Ok::<_, Error>(n)
///       })
///    })
///    .await?;
/// # Ok(())
/// # }
/// ```
pub trait DatabaseAccess: Send + Sync + 'static {
   /// Runs `work` against a consistent, read-only view of the database.
   fn read<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + Send;

   /// Runs `work` inside a write transaction, committing if it succeeds and
   /// rolling back if it fails.
   fn write<F, T, E>(&self, work: F) -> impl Future<Output = std::result::Result<T, E>> + Send
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>>
         + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send;

   /// Registers a handler invoked once after every committed write access.
   fn on_commit<H>(&self, handler: H) -> HookId
   where
      H: Fn(&CommitEvent) + Send + Sync + 'static;

   /// Unregisters a commit handler. Returns `false` if it was not registered.
   fn remove_commit_hook(&self, id: HookId) -> bool;

   /// Path of the database file
   fn path(&self) -> &Path;
}

/// Identity of one manager instance, used to tell nested accesses apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ManagerId(u64);

impl ManagerId {
   pub(crate) fn next() -> Self {
      static NEXT: AtomicU64 = AtomicU64::new(1);
      ManagerId(NEXT.fetch_add(1, Ordering::Relaxed))
   }
}

#[derive(Debug, Clone, Copy)]
struct ActiveAccess {
   manager: ManagerId,
   kind: AccessKind,
}

tokio::task_local! {
   static ACTIVE_ACCESSES: Vec<ActiveAccess>;
}

/// Marks a unit of work as running inside an access for as long as its future runs.
pub(crate) struct AccessScope {
   stack: Vec<ActiveAccess>,
}

impl AccessScope {
   /// Fails with [`Error::Reentrancy`] when the current task is already inside
   /// an access on `manager`.
   pub(crate) fn enter(manager: ManagerId, kind: AccessKind) -> Result<Self> {
      let mut stack = ACTIVE_ACCESSES
         .try_with(|active| active.clone())
         .unwrap_or_default();

      if let Some(active) = stack.iter().find(|access| access.manager == manager) {
         return Err(Error::Reentrancy {
            active: active.kind,
            requested: kind,
         });
      }

      stack.push(ActiveAccess { manager, kind });
      Ok(Self { stack })
   }

   pub(crate) async fn run<F: Future>(self, work: F) -> F::Output {
      ACTIVE_ACCESSES.scope(self.stack, work).await
   }
}
