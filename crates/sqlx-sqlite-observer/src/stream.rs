use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::change::{TableChange, TableChangeEvent};

/// A filtered stream of table change notifications.
///
/// Wraps a `BroadcastStream` with optional table filtering. A subscriber that
/// falls more than the channel capacity behind gets a
/// [`TableChangeEvent::Lagged`] item instead of the changes it missed.
pub struct TableChangeStream {
   inner: BroadcastStream<TableChange>,
   filter_tables: Option<HashSet<String>>,
}

impl TableChangeStream {
   pub fn new(rx: broadcast::Receiver<TableChange>) -> Self {
      Self {
         inner: BroadcastStream::new(rx),
         filter_tables: None,
      }
   }

   /// Only yield changes to the given tables. An empty list keeps every table.
   pub fn filter_tables<I, S>(mut self, tables: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      let tables: HashSet<String> = tables.into_iter().map(Into::into).collect();
      self.filter_tables = (!tables.is_empty()).then_some(tables);
      self
   }

   fn wants(&self, table: &str) -> bool {
      self
         .filter_tables
         .as_ref()
         .is_none_or(|tables| tables.contains(table))
   }
}

impl Stream for TableChangeStream {
   type Item = TableChangeEvent;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      loop {
         // BroadcastStream is Unpin
         match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(change))) => {
               if !self.wants(&change.table) {
                  continue;
               }
               return Poll::Ready(Some(TableChangeEvent::Change(change)));
            }
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(count)))) => {
               warn!(
                  missed = count,
                  "Stream lagged and missed change notifications; consider a larger channel_capacity"
               );
               return Poll::Ready(Some(TableChangeEvent::Lagged(count)));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => return Poll::Pending,
         }
      }
   }
}

/// Converts a broadcast receiver of table changes into a [`TableChangeStream`].
pub trait TableChangeStreamExt {
   fn into_stream(self) -> TableChangeStream;
}

impl TableChangeStreamExt for broadcast::Receiver<TableChange> {
   fn into_stream(self) -> TableChangeStream {
      TableChangeStream::new(self)
   }
}
