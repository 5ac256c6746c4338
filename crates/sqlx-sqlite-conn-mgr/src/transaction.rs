//! Transaction boundaries shared by both managers.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};

use crate::access::AccessScope;
use crate::commit::CommitPublisher;
use crate::context::{Isolation, ReadContext, Snapshot, WriteContext};
use crate::error::{Error, Result};
use crate::writer::{WriterConnection, WriterGuard};

/// SQLite transaction behavior selected by `BEGIN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionKind {
   /// Locks are taken on first use; used for reads
   Deferred,
   /// The write lock is taken up front; used for writes in WAL mode
   Immediate,
   /// Readers in other processes are shut out too. Used for writes in rollback
   /// journal mode, where an immediate transaction could otherwise only find
   /// out at `COMMIT` that a foreign reader blocks it.
   Exclusive,
}

impl TransactionKind {
   pub(crate) fn begin_statement(self) -> &'static str {
      match self {
         TransactionKind::Deferred => "BEGIN DEFERRED",
         TransactionKind::Immediate => "BEGIN IMMEDIATE",
         TransactionKind::Exclusive => "BEGIN EXCLUSIVE",
      }
   }
}

/// SQLite starts a deferred read transaction lazily, at its first read. Reading
/// here fixes the snapshot at access start rather than at the first user query.
pub(crate) async fn pin_snapshot(conn: &mut SqliteConnection) -> Result<()> {
   sqlx::query("SELECT COUNT(*) FROM sqlite_master")
      .execute(conn)
      .await?;
   Ok(())
}

/// Runs one write access on a writer the caller already holds.
///
/// `COMMIT` and the publishing of its event run on a task of their own that
/// takes over the writer. A caller that stops waiting midway through the commit
/// can neither separate the two nor let the next access in before the event has
/// its sequence number.
pub(crate) async fn write_access<F, T, E>(
   mut slot: WriterGuard,
   kind: TransactionKind,
   commits: &Arc<CommitPublisher>,
   scope: AccessScope,
   work: F,
) -> std::result::Result<T, E>
where
   F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>> + Send,
   T: Send,
   E: From<Error> + fmt::Display + Send,
{
   let writer = slot.as_mut().ok_or(Error::DatabaseClosed)?;
   writer.prepare().await?;
   writer.begin(kind).await?;

   let result = {
      let (conn, changes) = writer.parts();
      let mut ctx = WriteContext::new(conn, changes);
      scope.run(work(&mut ctx)).await
   };

   match result {
      Ok(value) => {
         commit_detached(slot, Arc::clone(commits)).await?;
         Ok(value)
      }
      Err(work_error) => Err(rollback_after(writer, work_error).await),
   }
}

async fn commit_detached(mut slot: WriterGuard, commits: Arc<CommitPublisher>) -> Result<u64> {
   let commit = tokio::spawn(async move {
      let writer = slot.as_mut().ok_or(Error::DatabaseClosed)?;
      match writer.commit().await {
         Ok(changes) => {
            let sequence = commits.publish(changes);
            debug!(sequence, "Write access committed");
            Ok(sequence)
         }
         Err(commit_error) => {
            warn!(error = %commit_error, "Commit failed, rolling back");
            Err(rollback_after(writer, commit_error).await)
         }
      }
   });

   match commit.await {
      Ok(outcome) => outcome,
      Err(join_error) if join_error.is_panic() => std::panic::resume_unwind(join_error.into_panic()),
      // The runtime is shutting down
      Err(_) => Err(Error::DatabaseClosed),
   }
}

/// Rolls back after a failure and returns the error the caller should see
async fn rollback_after<E>(writer: &mut WriterConnection, error: E) -> E
where
   E: From<Error> + fmt::Display,
{
   match writer.rollback().await {
      Ok(()) => {
         debug!("Write access rolled back");
         error
      }
      Err(rollback_error) => {
         warn!(error = %rollback_error, "Rollback failed");
         E::from(Error::TransactionRollbackFailed {
            transaction_error: error.to_string(),
            rollback_error: rollback_error.to_string(),
         })
      }
   }
}

/// Runs one read access on the writer connection (single-connection manager)
pub(crate) async fn serialized_read_access<F, T, E>(
   writer: &mut WriterConnection,
   commits: &CommitPublisher,
   scope: AccessScope,
   work: F,
) -> std::result::Result<T, E>
where
   F: for<'c> FnOnce(&'c mut ReadContext<'_>) -> BoxFuture<'c, std::result::Result<T, E>> + Send,
   T: Send,
   E: From<Error> + Send,
{
   writer.prepare().await?;

   if let Err(error) = writer.begin_read_only().await {
      if let Err(release_error) = writer.end_read_only().await {
         debug!(error = %release_error, "Cleanup after failed read begin also failed");
      }
      return Err(E::from(error));
   }

   let snapshot = Snapshot::new(Isolation::Serialized, commits.last_sequence());
   let result = {
      let (conn, _) = writer.parts();
      let mut ctx = ReadContext::new(conn, snapshot);
      scope.run(work(&mut ctx)).await
   };

   let released = writer.end_read_only().await;
   finish_read(result, released)
}

/// Combines the outcome of a read's work with the outcome of releasing it.
/// A work failure wins; a release failure after successful work is reported.
pub(crate) fn finish_read<T, E>(
   result: std::result::Result<T, E>,
   released: Result<()>,
) -> std::result::Result<T, E>
where
   E: From<Error>,
{
   match (result, released) {
      (result, Ok(())) => result,
      (Ok(_), Err(release_error)) => Err(E::from(release_error)),
      (Err(work_error), Err(release_error)) => {
         warn!(error = %release_error, "Failed to release read transaction");
         Err(work_error)
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_begin_statements() {
      assert_eq!(TransactionKind::Deferred.begin_statement(), "BEGIN DEFERRED");
      assert_eq!(TransactionKind::Immediate.begin_statement(), "BEGIN IMMEDIATE");
      assert_eq!(TransactionKind::Exclusive.begin_statement(), "BEGIN EXCLUSIVE");
   }

   #[test]
   fn test_finish_read_reports_release_failure() {
      let result: std::result::Result<i32, Error> = finish_read(Ok(1), Err(Error::DatabaseClosed));
      assert!(matches!(result, Err(Error::DatabaseClosed)));
   }

   #[test]
   fn test_finish_read_prefers_work_failure() {
      let result: std::result::Result<i32, Error> =
         finish_read(Err(Error::work("boom")), Err(Error::DatabaseClosed));
      assert_eq!(result.unwrap_err().to_string(), "boom");
   }

   #[test]
   fn test_finish_read_passes_through() {
      let result: std::result::Result<i32, Error> = finish_read(Ok(7), Ok(()));
      assert_eq!(result.unwrap(), 7);
   }
}
