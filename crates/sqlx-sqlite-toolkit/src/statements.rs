//! Composable statement helpers.
//!
//! Every function here takes an execution context instead of a database, so it
//! runs inside whatever access the caller already has open and can be combined
//! freely with other context-taking functions. None of them begins, commits, or
//! rolls back anything.

use futures::TryStreamExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite};
use sqlx_sqlite_conn_mgr::{ExecutionContext, WriteContext};
use tracing::trace;

use crate::{Error, Result};

/// One decoded row, keyed by column name in result order
pub type JsonRow = IndexMap<String, JsonValue>;

/// Result returned from write operations (e.g. INSERT, UPDATE, DELETE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteQueryResult {
   /// The number of rows affected by the write operation.
   pub rows_affected: u64,
   /// The last inserted row ID (SQLite ROWID).
   ///
   /// Only set for INSERT operations on tables with a ROWID.
   /// Tables created with `WITHOUT ROWID` will not set this value (returns 0).
   pub last_insert_id: i64,
}

/// A SQL statement with its positional JSON parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
   pub query: String,
   #[serde(default)]
   pub values: Vec<JsonValue>,
}

impl Statement {
   pub fn new(query: impl Into<String>, values: Vec<JsonValue>) -> Self {
      Self {
         query: query.into(),
         values,
      }
   }
}

impl<Q: Into<String>> From<(Q, Vec<JsonValue>)> for Statement {
   fn from((query, values): (Q, Vec<JsonValue>)) -> Self {
      Self::new(query, values)
   }
}

/// Execute a write query (INSERT/UPDATE/DELETE/DDL) in the current write access
pub async fn execute(
   ctx: &mut WriteContext<'_>,
   query: &str,
   values: Vec<JsonValue>,
) -> Result<WriteQueryResult> {
   let mut q = sqlx::query(query);
   for value in values {
      q = bind_value(q, value);
   }

   let result = q.execute(ctx.connection()).await?;
   Ok(WriteQueryResult {
      rows_affected: result.rows_affected(),
      last_insert_id: result.last_insert_rowid(),
   })
}

/// Execute statements in order, stopping at the first failure.
///
/// Atomicity comes from the surrounding write access: if this fails and the
/// caller propagates the error, everything the earlier statements did is
/// rolled back with the rest of the access.
pub async fn execute_statements(
   ctx: &mut WriteContext<'_>,
   statements: Vec<Statement>,
) -> Result<Vec<WriteQueryResult>> {
   let mut results = Vec::with_capacity(statements.len());
   for (index, statement) in statements.into_iter().enumerate() {
      trace!(index, "Executing statement");
      results.push(execute(ctx, &statement.query, statement.values).await?);
   }
   Ok(results)
}

/// Execute a SELECT query, possibly returning multiple rows
pub async fn fetch_all<C: ExecutionContext>(
   ctx: &mut C,
   query: &str,
   values: Vec<JsonValue>,
) -> Result<Vec<JsonRow>> {
   let mut q = sqlx::query(query);
   for value in values {
      q = bind_value(q, value);
   }

   let rows = q.fetch_all(ctx.connection()).await?;
   rows.iter().map(decode_row).collect()
}

/// Execute a SELECT query expecting zero or one result.
///
/// Fails with [`Error::MultipleRowsReturned`] if the query yields more than
/// one row. The query text is used as given, so it may carry its own LIMIT.
pub async fn fetch_one<C: ExecutionContext>(
   ctx: &mut C,
   query: &str,
   values: Vec<JsonValue>,
) -> Result<Option<JsonRow>> {
   let mut q = sqlx::query(query);
   for value in values {
      q = bind_value(q, value);
   }

   let mut rows = q.fetch(ctx.connection());
   let Some(first) = rows.try_next().await? else {
      return Ok(None);
   };

   let mut count = 1;
   while rows.try_next().await?.is_some() {
      count += 1;
   }
   if count > 1 {
      return Err(Error::MultipleRowsReturned(count));
   }

   decode_row(&first).map(Some)
}

/// Bind a JSON value to a query.
///
/// Integers that fit in `i64` are bound as integers so no precision is lost;
/// larger unsigned values fall back to `f64`. Booleans become 0/1, arrays and
/// objects are bound as JSON text.
pub fn bind_value<'a>(
   query: Query<'a, Sqlite, SqliteArguments<'a>>,
   value: JsonValue,
) -> Query<'a, Sqlite, SqliteArguments<'a>> {
   match value {
      JsonValue::Null => query.bind(None::<JsonValue>),
      JsonValue::Bool(flag) => query.bind(flag),
      JsonValue::String(text) => query.bind(text),
      JsonValue::Number(number) => {
         if let Some(int_val) = number.as_i64() {
            query.bind(int_val)
         } else if let Some(uint_val) = number.as_u64() {
            // Only reached above i64::MAX
            query.bind(uint_val as f64)
         } else {
            query.bind(number.as_f64().unwrap_or_default())
         }
      }
      other => query.bind(other),
   }
}

pub(crate) fn decode_row(row: &SqliteRow) -> Result<JsonRow> {
   let mut value = IndexMap::with_capacity(row.columns().len());
   for (i, column) in row.columns().iter().enumerate() {
      let v = row.try_get_raw(i)?;
      value.insert(column.name().to_string(), crate::decode::to_json(v)?);
   }
   Ok(value)
}
