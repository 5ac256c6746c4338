//! Execution contexts handed to units of work.
//!
//! A context is the capability to run statements inside one open access. It
//! carries no handle back to its manager, so code that only receives a context
//! can compose with other context-taking functions but cannot start a second,
//! independent access.

use std::fmt;
use std::ops::{Deref, DerefMut};

use futures::future::BoxFuture;
use sqlx::sqlite::SqliteConnection;
use tracing::{trace, warn};

use crate::access::AccessKind;
use crate::error::Error;
use crate::writer::ChangeBuffer;

/// How a read access is isolated from writers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
   /// No write can run while the read is open (single connection)
   Serialized,
   /// The read sees a WAL snapshot fixed at access start while writes proceed
   Snapshot,
}

/// The point-in-time view a read access observes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
   isolation: Isolation,
   commit_floor: u64,
}

impl Snapshot {
   pub(crate) fn new(isolation: Isolation, commit_floor: u64) -> Self {
      Self {
         isolation,
         commit_floor,
      }
   }

   pub fn isolation(&self) -> Isolation {
      self.isolation
   }

   /// Every write access whose commit sequence is at or below this value is
   /// visible in the snapshot.
   ///
   /// Exact under [`Isolation::Serialized`]. Under [`Isolation::Snapshot`] a
   /// commit that lands while the snapshot is being taken may also be visible.
   pub fn commit_floor(&self) -> u64 {
      self.commit_floor
   }
}

/// Common surface of [`ReadContext`] and [`WriteContext`] for composable
/// functions that only need to run statements.
pub trait ExecutionContext: Send {
   fn connection(&mut self) -> &mut SqliteConnection;

   fn kind(&self) -> AccessKind;
}

/// Context of a read access
pub struct ReadContext<'a> {
   conn: &'a mut SqliteConnection,
   snapshot: Snapshot,
}

impl<'a> ReadContext<'a> {
   pub(crate) fn new(conn: &'a mut SqliteConnection, snapshot: Snapshot) -> Self {
      Self { conn, snapshot }
   }

   pub fn snapshot(&self) -> Snapshot {
      self.snapshot
   }
}

impl ExecutionContext for ReadContext<'_> {
   fn connection(&mut self) -> &mut SqliteConnection {
      &mut *self.conn
   }

   fn kind(&self) -> AccessKind {
      AccessKind::Read
   }
}

impl Deref for ReadContext<'_> {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &*self.conn
   }
}

impl DerefMut for ReadContext<'_> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut *self.conn
   }
}

impl fmt::Debug for ReadContext<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("ReadContext")
         .field("snapshot", &self.snapshot)
         .finish_non_exhaustive()
   }
}

/// Context of a write access
///
/// Everything executed through this context belongs to the access's single
/// transaction and is visible to later statements of the same access.
pub struct WriteContext<'a> {
   conn: &'a mut SqliteConnection,
   changes: &'a ChangeBuffer,
   savepoint_depth: u32,
}

impl<'a> WriteContext<'a> {
   pub(crate) fn new(conn: &'a mut SqliteConnection, changes: &'a ChangeBuffer) -> Self {
      Self {
         conn,
         changes,
         savepoint_depth: 0,
      }
   }

   /// Number of savepoints enclosing this context
   pub fn savepoint_depth(&self) -> u32 {
      self.savepoint_depth
   }

   /// Runs `work` inside a savepoint of the current transaction.
   ///
   /// If `work` fails, only its own statements are undone and the error is
   /// returned; the enclosing access stays open and may continue or fail as a
   /// whole. Savepoints nest.
   pub async fn savepoint<F, T, E>(&mut self, work: F) -> Result<T, E>
   where
      F: for<'c> FnOnce(&'c mut WriteContext<'_>) -> BoxFuture<'c, Result<T, E>> + Send,
      T: Send,
      E: From<Error> + fmt::Display + Send,
   {
      let depth = self.savepoint_depth + 1;
      let name = format!("access_savepoint_{depth}");

      sqlx::query(&format!("SAVEPOINT {name}"))
         .execute(&mut *self.conn)
         .await
         .map_err(Error::from)?;
      let mark = self.changes.mark();
      trace!(savepoint = %name, "Savepoint opened");

      let result = {
         let mut nested = WriteContext {
            conn: &mut *self.conn,
            changes: self.changes,
            savepoint_depth: depth,
         };
         work(&mut nested).await
      };

      match result {
         Ok(value) => {
            sqlx::query(&format!("RELEASE {name}"))
               .execute(&mut *self.conn)
               .await
               .map_err(Error::from)?;
            Ok(value)
         }
         Err(error) => {
            let undo = sqlx::query(&format!("ROLLBACK TO {name}"))
               .execute(&mut *self.conn)
               .await;
            self.changes.truncate(mark);

            match undo {
               Ok(_) => {
                  sqlx::query(&format!("RELEASE {name}"))
                     .execute(&mut *self.conn)
                     .await
                     .map_err(Error::from)?;
                  trace!(savepoint = %name, "Savepoint rolled back");
                  Err(error)
               }
               Err(rollback_error) => {
                  warn!(savepoint = %name, error = %rollback_error, "Savepoint rollback failed");
                  Err(E::from(Error::TransactionRollbackFailed {
                     transaction_error: error.to_string(),
                     rollback_error: rollback_error.to_string(),
                  }))
               }
            }
         }
      }
   }
}

impl ExecutionContext for WriteContext<'_> {
   fn connection(&mut self) -> &mut SqliteConnection {
      &mut *self.conn
   }

   fn kind(&self) -> AccessKind {
      AccessKind::Write
   }
}

impl Deref for WriteContext<'_> {
   type Target = SqliteConnection;

   fn deref(&self) -> &Self::Target {
      &*self.conn
   }
}

impl DerefMut for WriteContext<'_> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut *self.conn
   }
}

impl fmt::Debug for WriteContext<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("WriteContext")
         .field("savepoint_depth", &self.savepoint_depth)
         .finish_non_exhaustive()
   }
}
