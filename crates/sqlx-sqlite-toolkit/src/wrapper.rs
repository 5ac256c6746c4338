use std::path::Path;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx_sqlite_conn_mgr::{DatabaseAccess, SqliteDatabase, SqliteDatabaseConfig};

use crate::statements::{self, JsonRow, Statement, WriteQueryResult};
use crate::Result;

/// High-level JSON interface over a database manager.
///
/// Every method runs exactly one access: writes one write access, reads one
/// read access. To combine several steps atomically, open the access yourself
/// and call the functions in [`statements`](crate::statements) with its context.
pub struct DatabaseWrapper<D: DatabaseAccess = SqliteDatabase> {
   inner: Arc<D>,
}

impl<D: DatabaseAccess> Clone for DatabaseWrapper<D> {
   fn clone(&self) -> Self {
      Self {
         inner: Arc::clone(&self.inner),
      }
   }
}

impl DatabaseWrapper<SqliteDatabase> {
   /// Connect to a SQLite database through the pooled connection manager
   pub async fn connect_with_path(
      abs_path: &Path,
      custom_config: Option<SqliteDatabaseConfig>,
   ) -> Result<Self> {
      let db = SqliteDatabase::connect(abs_path, custom_config).await?;
      Ok(Self::new(db))
   }

   /// Close the database connection
   pub async fn close(self) -> Result<()> {
      self.inner.close().await?;
      Ok(())
   }

   /// Close the database connection and remove all database files
   pub async fn remove(self) -> Result<()> {
      self.inner.remove().await?;
      Ok(())
   }
}

impl<D: DatabaseAccess> DatabaseWrapper<D> {
   pub fn new(inner: Arc<D>) -> Self {
      Self { inner }
   }

   /// The wrapped manager, for opening accesses directly
   pub fn inner(&self) -> &Arc<D> {
      &self.inner
   }

   /// Execute a write query (INSERT/UPDATE/DELETE) in its own write access
   pub async fn execute(&self, query: String, values: Vec<JsonValue>) -> Result<WriteQueryResult> {
      self
         .inner
         .write(move |ctx| Box::pin(async move { statements::execute(ctx, &query, values).await }))
         .await
   }

   /// Execute multiple write statements atomically in one write access.
   ///
   /// Commits if every statement succeeds. Otherwise the access rolls back and
   /// the first failure is returned.
   pub async fn execute_transaction<S>(&self, statements: Vec<S>) -> Result<Vec<WriteQueryResult>>
   where
      S: Into<Statement>,
   {
      let batch: Vec<Statement> = statements.into_iter().map(Into::into).collect();
      self
         .inner
         .write(move |ctx| Box::pin(async move { statements::execute_statements(ctx, batch).await }))
         .await
   }

   /// Execute a SELECT query, possibly returning multiple rows
   pub async fn fetch_all(&self, query: String, values: Vec<JsonValue>) -> Result<Vec<JsonRow>> {
      self
         .inner
         .read(move |ctx| Box::pin(async move { statements::fetch_all(ctx, &query, values).await }))
         .await
   }

   /// Execute a SELECT query expecting zero or one result
   pub async fn fetch_one(&self, query: String, values: Vec<JsonValue>) -> Result<Option<JsonRow>> {
      self
         .inner
         .read(move |ctx| Box::pin(async move { statements::fetch_one(ctx, &query, values).await }))
         .await
   }
}

impl<D: DatabaseAccess> std::fmt::Debug for DatabaseWrapper<D> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("DatabaseWrapper")
         .field("path", &self.inner.path())
         .finish()
   }
}
