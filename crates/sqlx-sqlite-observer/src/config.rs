/// Default capacity of the broadcast channel shared by all subscribers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for [`ObservableDatabase`](crate::ObservableDatabase).
///
/// # Example
///
/// ```
/// use sqlx_sqlite_observer::ObserverConfig;
///
/// let config = ObserverConfig::new()
///    .with_tables(["users", "posts"])
///    .with_channel_capacity(1024);
///
/// assert_eq!(config.tables, vec!["users", "posts"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverConfig {
   /// Tables observed from the start. More can be added by subscribing.
   pub tables: Vec<String>,
   /// Number of changes buffered per subscriber before it starts lagging
   pub channel_capacity: usize,
}

impl Default for ObserverConfig {
   fn default() -> Self {
      Self {
         tables: Vec::new(),
         channel_capacity: DEFAULT_CHANNEL_CAPACITY,
      }
   }
}

impl ObserverConfig {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_tables<I, S>(mut self, tables: I) -> Self
   where
      I: IntoIterator<Item = S>,
      S: Into<String>,
   {
      self.tables = tables.into_iter().map(Into::into).collect();
      self
   }

   /// Sets the channel capacity. A capacity of zero is raised to one.
   pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
      self.channel_capacity = capacity.max(1);
      self
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_defaults() {
      let config = ObserverConfig::new();
      assert!(config.tables.is_empty());
      assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
   }

   #[test]
   fn test_zero_capacity_is_raised() {
      assert_eq!(ObserverConfig::new().with_channel_capacity(0).channel_capacity, 1);
   }
}
