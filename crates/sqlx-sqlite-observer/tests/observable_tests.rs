//! Integration tests for `ObservableDatabase` over both connection strategies.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use sqlx_sqlite_conn_mgr::{DatabaseAccess, Error as ConnMgrError, SqliteDatabase, SqliteQueue};
use sqlx_sqlite_observer::{
   ChangeOperation, Error, ObservableDatabase, ObserverConfig, TableChangeEvent,
};
use tempfile::TempDir;
use tokio::time::timeout;

struct TestDb<D: DatabaseAccess> {
   db: Arc<D>,
   _temp_dir: TempDir,
}

fn init_tracing() {
   let _ = tracing_subscriber::fmt()
      .with_test_writer()
      .with_max_level(tracing::Level::DEBUG)
      .try_init();
}

async fn create_tables<D: DatabaseAccess>(db: &D) {
   db.write(|ctx| {
      Box::pin(async move {
         sqlx::query(
            r#"
            CREATE TABLE users (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               name TEXT NOT NULL
            )
            "#,
         )
         .execute(&mut **ctx)
         .await?;

         sqlx::query(
            r#"
            CREATE TABLE posts (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               user_id INTEGER NOT NULL,
               title TEXT NOT NULL,
               FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
         )
         .execute(&mut **ctx)
         .await?;
         Ok::<_, ConnMgrError>(())
      })
   })
   .await
   .unwrap();
}

async fn setup_test_db() -> TestDb<SqliteDatabase> {
   init_tracing();
   let temp_dir = TempDir::new().unwrap();
   let db = SqliteDatabase::connect(temp_dir.path().join("observed.db"), None)
      .await
      .unwrap();
   create_tables(&*db).await;

   TestDb {
      db,
      _temp_dir: temp_dir,
   }
}

async fn setup_test_queue() -> TestDb<SqliteQueue> {
   init_tracing();
   let temp_dir = TempDir::new().unwrap();
   let db = SqliteQueue::connect(temp_dir.path().join("observed.db"), None)
      .await
      .unwrap();
   create_tables(&*db).await;

   TestDb {
      db,
      _temp_dir: temp_dir,
   }
}

async fn run<D: DatabaseAccess>(db: &D, sql: &'static str) -> Result<(), ConnMgrError> {
   db.write(move |ctx| {
      Box::pin(async move {
         sqlx::query(sql).execute(&mut **ctx).await?;
         Ok(())
      })
   })
   .await
}

// ============================================================================
// Observable Lifecycle
// ============================================================================

#[tokio::test]
async fn test_observable_starts_with_configured_tables() {
   let test_db = setup_test_db().await;
   let config = ObserverConfig::new().with_tables(["users"]);
   let observable = ObservableDatabase::new(test_db.db, config);

   assert_eq!(observable.observed_tables(), vec!["users"]);

   let _rx = observable.subscribe(["posts"]);
   assert_eq!(observable.observed_tables(), vec!["posts", "users"]);
}

#[tokio::test]
async fn test_dropping_last_clone_stops_publishing() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let clone = observable.clone();
   let mut rx = observable.subscribe(["users"]);

   drop(observable);
   run(&*test_db.db, "INSERT INTO users (name) VALUES ('kept')")
      .await
      .unwrap();
   assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());

   drop(clone);
   run(&*test_db.db, "INSERT INTO users (name) VALUES ('unseen')")
      .await
      .unwrap();

   // The broker went away with the hook, so the channel closes
   let result = timeout(Duration::from_millis(100), rx.recv()).await;
   assert!(matches!(result, Ok(Err(_)) | Err(_)));
}

// ============================================================================
// Transaction Semantics
// ============================================================================

#[tokio::test]
async fn test_commit_publishes_notification() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut rx = observable.subscribe(["users"]);

   run(&*test_db.db, "INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap();

   let change = timeout(Duration::from_millis(100), rx.recv())
      .await
      .expect("Should receive notification after commit")
      .unwrap();
   assert_eq!(change.table, "users");
   assert_eq!(change.operation, ChangeOperation::Insert);
   assert_eq!(change.rowid, 1);
   assert_eq!(change.commit_sequence, test_db.db.last_commit());
}

#[tokio::test]
async fn test_rollback_discards_changes() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut rx = observable.subscribe(["users"]);

   let result = test_db
      .db
      .write(|ctx| {
         Box::pin(async move {
            sqlx::query("INSERT INTO users (name) VALUES ('Charlie')")
               .execute(&mut **ctx)
               .await?;
            Err::<(), _>(ConnMgrError::work("changed my mind"))
         })
      })
      .await;
   assert!(result.is_err());

   let result = timeout(Duration::from_millis(100), rx.recv()).await;
   assert!(result.is_err(), "Should NOT notify for rolled-back changes");
}

#[tokio::test]
async fn test_changes_arrive_in_commit_order() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut rx = observable.subscribe(["users"]);

   run(&*test_db.db, "INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap();
   run(&*test_db.db, "UPDATE users SET name = 'Bob' WHERE id = 1")
      .await
      .unwrap();
   run(&*test_db.db, "DELETE FROM users WHERE id = 1")
      .await
      .unwrap();

   let mut operations = Vec::new();
   let mut sequences = Vec::new();
   for _ in 0..3 {
      let change = timeout(Duration::from_millis(100), rx.recv())
         .await
         .unwrap()
         .unwrap();
      operations.push(change.operation);
      sequences.push(change.commit_sequence);
   }

   assert_eq!(
      operations,
      vec![
         ChangeOperation::Insert,
         ChangeOperation::Update,
         ChangeOperation::Delete
      ]
   );
   assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_unobserved_tables_are_not_published() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut rx = observable.subscribe(["users"]);

   run(
      &*test_db.db,
      "INSERT INTO posts (user_id, title) VALUES (1, 'Hello')",
   )
   .await
   .unwrap();

   let result = timeout(Duration::from_millis(100), rx.recv()).await;
   assert!(result.is_err(), "posts is not observed");
}

// ============================================================================
// Multi-Subscriber & Clone
// ============================================================================

#[tokio::test]
async fn test_all_subscribers_receive_notification() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut rx1 = observable.subscribe(["users"]);
   let mut rx2 = observable.clone().subscribe(["users"]);

   run(&*test_db.db, "INSERT INTO users (name) VALUES ('Alice')")
      .await
      .unwrap();

   let result1 = timeout(Duration::from_millis(100), rx1.recv()).await;
   let result2 = timeout(Duration::from_millis(100), rx2.recv()).await;

   assert!(result1.is_ok(), "Subscriber 1 receives notification");
   assert!(result2.is_ok(), "Subscriber 2 receives notification");
}

#[tokio::test]
async fn test_queue_manager_is_observable() {
   let test_db = setup_test_queue().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut rx = observable.subscribe(["users"]);

   run(&*test_db.db, "INSERT INTO users (name) VALUES ('Queued')")
      .await
      .unwrap();

   let change = timeout(Duration::from_millis(100), rx.recv())
      .await
      .unwrap()
      .unwrap();
   assert_eq!(change.operation, ChangeOperation::Insert);
}

// ============================================================================
// Stream API
// ============================================================================

#[tokio::test]
async fn test_stream_filters_tables() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users"]),
   );
   let mut stream = observable.subscribe_stream(["posts"]);

   run(&*test_db.db, "INSERT INTO users (name) VALUES ('Eve')")
      .await
      .unwrap();
   run(
      &*test_db.db,
      "INSERT INTO posts (user_id, title) VALUES (1, 'First')",
   )
   .await
   .unwrap();

   let event = timeout(Duration::from_millis(100), stream.next())
      .await
      .expect("Stream receives notification")
      .unwrap();
   match event {
      TableChangeEvent::Change(change) => assert_eq!(change.table, "posts"),
      TableChangeEvent::Lagged(_) => panic!("Expected Change event, got Lagged"),
   }
}

#[tokio::test]
async fn test_slow_stream_reports_lag() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new()
         .with_tables(["users"])
         .with_channel_capacity(2),
   );
   let mut stream = observable.subscribe_stream(["users"]);

   test_db
      .db
      .write(|ctx| {
         Box::pin(async move {
            for i in 0..5 {
               sqlx::query("INSERT INTO users (name) VALUES (?)")
                  .bind(format!("user{i}"))
                  .execute(&mut **ctx)
                  .await?;
            }
            Ok::<_, ConnMgrError>(())
         })
      })
      .await
      .unwrap();

   // Give the dispatcher time to publish all five
   tokio::time::sleep(Duration::from_millis(50)).await;

   let event = timeout(Duration::from_millis(100), stream.next())
      .await
      .unwrap()
      .unwrap();
   assert_eq!(event, TableChangeEvent::Lagged(3));
}

// ============================================================================
// Schema Checks
// ============================================================================

#[tokio::test]
async fn test_verify_tables_accepts_rowid_tables() {
   let test_db = setup_test_db().await;
   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users", "posts", "not_created_yet"]),
   );

   observable.verify_tables().await.unwrap();
}

#[tokio::test]
async fn test_verify_tables_rejects_without_rowid() {
   let test_db = setup_test_db().await;
   run(
      &*test_db.db,
      "CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT) WITHOUT ROWID",
   )
   .await
   .unwrap();

   let observable = ObservableDatabase::new(
      Arc::clone(&test_db.db),
      ObserverConfig::new().with_tables(["users", "settings"]),
   );

   let result = observable.verify_tables().await;
   assert!(matches!(result, Err(Error::UnobservableTable(table)) if table == "settings"));
}
