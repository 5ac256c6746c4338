//! Fan-out of committed row changes to subscribers.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use sqlx_sqlite_conn_mgr::CommitEvent;
use tokio::sync::broadcast;
use tracing::trace;

use crate::change::TableChange;

/// Holds the set of observed tables and the broadcast channel that carries
/// their changes.
///
/// Shared by every clone of an [`ObservableDatabase`](crate::ObservableDatabase)
/// and by the commit hook it registers.
#[derive(Debug)]
pub struct ObservationBroker {
   sender: broadcast::Sender<TableChange>,
   observed: RwLock<BTreeSet<String>>,
}

impl ObservationBroker {
   pub fn new(channel_capacity: usize) -> Arc<Self> {
      let (sender, _) = broadcast::channel(channel_capacity.max(1));
      Arc::new(Self {
         sender,
         observed: RwLock::new(BTreeSet::new()),
      })
   }

   /// Adds tables to the observed set. Already observed tables are ignored.
   pub fn observe_tables<'a>(&self, tables: impl IntoIterator<Item = &'a str>) {
      let mut observed = self.observed.write();
      for table in tables {
         if observed.insert(table.to_string()) {
            trace!(table, "Observing table");
         }
      }
   }

   pub fn is_observed(&self, table: &str) -> bool {
      self.observed.read().contains(table)
   }

   /// Observed tables in name order
   pub fn get_observed_tables(&self) -> Vec<String> {
      self.observed.read().iter().cloned().collect()
   }

   pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
      self.sender.subscribe()
   }

   pub fn subscriber_count(&self) -> usize {
      self.sender.receiver_count()
   }

   /// Publishes the changes of one commit that touch observed tables.
   ///
   /// Returns how many changes were published.
   pub fn publish(&self, event: &CommitEvent) -> usize {
      let changes: Vec<TableChange> = {
         let observed = self.observed.read();
         event
            .changes
            .iter()
            .filter(|change| observed.contains(&change.table))
            .map(|change| TableChange {
               table: change.table.clone(),
               operation: change.operation,
               rowid: change.rowid,
               commit_sequence: event.sequence,
               timestamp: event.committed_at,
            })
            .collect()
      };

      let published = changes.len();
      for change in changes {
         // Fails only when nobody is subscribed, which is fine
         if self.sender.send(change).is_err() {
            trace!(sequence = event.sequence, "No subscribers for table change");
            break;
         }
      }

      published
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use std::time::Instant;
   use sqlx_sqlite_conn_mgr::{ChangeOperation, RowChange};

   fn event(sequence: u64, tables: &[&str]) -> CommitEvent {
      CommitEvent {
         sequence,
         changes: tables
            .iter()
            .enumerate()
            .map(|(i, table)| RowChange {
               table: table.to_string(),
               operation: ChangeOperation::Insert,
               rowid: i as i64 + 1,
            })
            .collect(),
         committed_at: Instant::now(),
      }
   }

   #[test]
   fn test_only_observed_tables_are_published() {
      let broker = ObservationBroker::new(16);
      broker.observe_tables(["users"]);
      let mut rx = broker.subscribe();

      assert_eq!(broker.publish(&event(7, &["users", "posts", "users"])), 2);

      let first = rx.try_recv().unwrap();
      let second = rx.try_recv().unwrap();
      assert_eq!((first.table.as_str(), first.rowid), ("users", 1));
      assert_eq!((second.table.as_str(), second.rowid), ("users", 3));
      assert_eq!(second.commit_sequence, 7);
      assert!(rx.try_recv().is_err());
   }

   #[test]
   fn test_observe_tables_deduplicates() {
      let broker = ObservationBroker::new(16);
      broker.observe_tables(["posts", "users"]);
      broker.observe_tables(["users"]);

      assert_eq!(broker.get_observed_tables(), vec!["posts", "users"]);
      assert!(broker.is_observed("posts"));
      assert!(!broker.is_observed("comments"));
   }

   #[test]
   fn test_publish_without_subscribers() {
      let broker = ObservationBroker::new(16);
      broker.observe_tables(["users"]);

      assert_eq!(broker.subscriber_count(), 0);
      assert_eq!(broker.publish(&event(1, &["users"])), 1);
   }
}
