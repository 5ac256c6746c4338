//! Post-commit notifications.
//!
//! Every committed write access produces exactly one [`CommitEvent`]. Events are
//! numbered while the writer is still held, queued in that order, and delivered
//! to handlers by a dispatcher task so slow handlers never hold up the next writer.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use sqlx::sqlite::SqliteOperation;
use tokio::sync::mpsc;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
   Insert,
   Update,
   Delete,
}

impl ChangeOperation {
   pub(crate) fn from_sqlite(operation: SqliteOperation) -> Option<Self> {
      match operation {
         SqliteOperation::Insert => Some(ChangeOperation::Insert),
         SqliteOperation::Update => Some(ChangeOperation::Update),
         SqliteOperation::Delete => Some(ChangeOperation::Delete),
         _ => None,
      }
   }
}

/// One row touched by a committed write access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
   /// Table name. Tables in attached databases are qualified as `schema.table`.
   pub table: String,
   pub operation: ChangeOperation,
   pub rowid: i64,
}

/// Descriptor of one committed write access.
#[derive(Debug, Clone)]
pub struct CommitEvent {
   /// Position of this commit in the manager's commit order, starting at 1
   pub sequence: u64,
   /// Row changes in the order they were applied. Empty for commits that only
   /// ran DDL or changed nothing; changes rolled back by a savepoint are excluded.
   pub changes: Vec<RowChange>,
   pub committed_at: Instant,
}

impl CommitEvent {
   /// Names of the tables changed by this commit
   pub fn tables(&self) -> BTreeSet<&str> {
      self
         .changes
         .iter()
         .map(|change| change.table.as_str())
         .collect()
   }

   pub fn touches(&self, table: &str) -> bool {
      self.changes.iter().any(|change| change.table == table)
   }
}

/// Handle returned by `on_commit`, used to unregister the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

type CommitHandler = Arc<dyn Fn(&CommitEvent) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
   next_id: AtomicU64,
   handlers: RwLock<BTreeMap<HookId, CommitHandler>>,
}

/// Numbers commits and hands them to the dispatcher task.
pub(crate) struct CommitPublisher {
   sequence: AtomicU64,
   registry: Arc<HandlerRegistry>,
   sender: mpsc::UnboundedSender<CommitEvent>,
}

impl CommitPublisher {
   /// Creates the publisher and spawns its dispatcher on the current runtime.
   ///
   /// The dispatcher exits once the publisher is dropped and the queue drains.
   pub(crate) fn spawn() -> Self {
      let registry = Arc::new(HandlerRegistry::default());
      let (sender, receiver) = mpsc::unbounded_channel();
      tokio::spawn(dispatch(receiver, Arc::clone(&registry)));

      Self {
         sequence: AtomicU64::new(0),
         registry,
         sender,
      }
   }

   /// Sequence number of the latest committed write access
   pub(crate) fn last_sequence(&self) -> u64 {
      self.sequence.load(Ordering::Acquire)
   }

   /// Must be called while the writer is still held so that sequence numbers
   /// and queue order match commit order.
   pub(crate) fn publish(&self, changes: Vec<RowChange>) -> u64 {
      let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
      let event = CommitEvent {
         sequence,
         changes,
         committed_at: Instant::now(),
      };

      if self.sender.send(event).is_err() {
         warn!(sequence, "Commit dispatcher has stopped; notification dropped");
      }

      sequence
   }

   pub(crate) fn register<H>(&self, handler: H) -> HookId
   where
      H: Fn(&CommitEvent) + Send + Sync + 'static,
   {
      let id = HookId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
      self.registry.handlers.write().insert(id, Arc::new(handler));
      id
   }

   pub(crate) fn unregister(&self, id: HookId) -> bool {
      self.registry.handlers.write().remove(&id).is_some()
   }
}

async fn dispatch(mut receiver: mpsc::UnboundedReceiver<CommitEvent>, registry: Arc<HandlerRegistry>) {
   while let Some(event) = receiver.recv().await {
      // Snapshot the handlers so registration never waits on delivery
      let handlers: Vec<CommitHandler> = registry.handlers.read().values().cloned().collect();
      trace!(
         sequence = event.sequence,
         changes = event.changes.len(),
         handlers = handlers.len(),
         "Delivering commit event"
      );

      for handler in handlers {
         if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
            warn!(sequence = event.sequence, "Commit handler panicked");
         }
      }
   }

   trace!("Commit dispatcher stopped");
}
