//! Integration tests for the single-connection manager (`SqliteQueue`).

use std::sync::Arc;
use std::time::Duration;

use sqlx_sqlite_conn_mgr::{
   AccessKind, ChangeOperation, DatabaseAccess, Error, Isolation, SqliteDatabase, SqliteQueue,
   SqliteQueueConfig,
};
use sqlx::Connection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

async fn create_test_queue(config: Option<SqliteQueueConfig>) -> (Arc<SqliteQueue>, TempDir) {
   let temp_dir = TempDir::new().expect("Failed to create temp directory");
   let queue = SqliteQueue::connect(temp_dir.path().join("queue.db"), config)
      .await
      .expect("Failed to connect to test queue");

   queue
      .write(|ctx| {
         Box::pin(async move {
            sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
               .execute(&mut **ctx)
               .await?;
            Ok::<_, Error>(())
         })
      })
      .await
      .expect("Failed to create test table");

   (queue, temp_dir)
}

async fn insert_item(queue: &SqliteQueue, name: &'static str) -> Result<i64, Error> {
   queue
      .write(move |ctx| {
         Box::pin(async move {
            let result = sqlx::query("INSERT INTO items (name) VALUES (?)")
               .bind(name)
               .execute(&mut **ctx)
               .await?;
            Ok(result.last_insert_rowid())
         })
      })
      .await
}

async fn item_names(queue: &SqliteQueue) -> Vec<String> {
   queue
      .read(|ctx| {
         Box::pin(async move {
            let names = sqlx::query_scalar("SELECT name FROM items ORDER BY id")
               .fetch_all(&mut **ctx)
               .await?;
            Ok::<_, Error>(names)
         })
      })
      .await
      .unwrap()
}

#[tokio::test]
async fn test_write_then_read() {
   let (queue, _temp) = create_test_queue(None).await;

   insert_item(&queue, "first").await.unwrap();
   insert_item(&queue, "second").await.unwrap();

   assert_eq!(item_names(&queue).await, vec!["first", "second"]);
   assert_eq!(queue.last_commit(), 3);
}

#[tokio::test]
async fn test_failed_write_is_rolled_back() {
   let (queue, _temp) = create_test_queue(None).await;

   let result = queue
      .write(|ctx| {
         Box::pin(async move {
            sqlx::query("INSERT INTO items (name) VALUES ('doomed')")
               .execute(&mut **ctx)
               .await?;
            // Fails on the NOT NULL constraint after the first insert succeeded
            sqlx::query("INSERT INTO items (name) VALUES (NULL)")
               .execute(&mut **ctx)
               .await?;
            Ok::<_, Error>(())
         })
      })
      .await;

   assert!(matches!(result, Err(Error::Sqlx(_))));
   assert!(item_names(&queue).await.is_empty());
}

#[tokio::test]
async fn test_read_snapshot_is_serialized_and_exact() {
   let (queue, _temp) = create_test_queue(None).await;
   insert_item(&queue, "one").await.unwrap();

   let snapshot = queue
      .read(|ctx| Box::pin(async move { Ok::<_, Error>(ctx.snapshot()) }))
      .await
      .unwrap();

   assert_eq!(snapshot.isolation(), Isolation::Serialized);
   assert_eq!(snapshot.commit_floor(), queue.last_commit());
}

#[tokio::test]
async fn test_read_is_read_only_and_connection_recovers() {
   let (queue, _temp) = create_test_queue(None).await;

   let result = queue
      .read(|ctx| {
         Box::pin(async move {
            sqlx::query("INSERT INTO items (name) VALUES ('sneaky')")
               .execute(&mut **ctx)
               .await?;
            Ok::<_, Error>(())
         })
      })
      .await;
   assert!(result.is_err());

   // query_only was switched back off for the writer
   insert_item(&queue, "legit").await.unwrap();
   assert_eq!(item_names(&queue).await, vec!["legit"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_waits_for_running_write() {
   let (queue, _temp) = create_test_queue(None).await;
   let (started_tx, started_rx) = oneshot::channel::<()>();
   let (release_tx, release_rx) = oneshot::channel::<()>();

   let writer_queue = Arc::clone(&queue);
   let writer = tokio::spawn(async move {
      writer_queue
         .write(move |ctx| {
            Box::pin(async move {
               sqlx::query("INSERT INTO items (name) VALUES ('pending')")
                  .execute(&mut **ctx)
                  .await?;
               let _ = started_tx.send(());
               let _ = release_rx.await;
               Ok::<_, Error>(())
            })
         })
         .await
   });
   started_rx.await.unwrap();

   // The read cannot overlap the write
   let blocked = timeout(Duration::from_millis(200), item_names(&queue)).await;
   assert!(blocked.is_err());

   release_tx.send(()).unwrap();
   writer.await.unwrap().unwrap();

   // Never a partial view: the row shows up only once the write committed
   assert_eq!(item_names(&queue).await, vec!["pending"]);
}

#[tokio::test]
async fn test_write_shuts_out_readers_on_other_connections() {
   let (queue, temp) = create_test_queue(None).await;
   insert_item(&queue, "before").await.unwrap();

   // Stands in for a reader in another process
   let options = SqliteConnectOptions::new()
      .filename(temp.path().join("queue.db"))
      .read_only(true)
      .busy_timeout(Duration::ZERO);
   let mut foreign = SqliteConnection::connect_with(&options).await.unwrap();

   let (blocked, mut foreign) = queue
      .write(move |ctx| {
         Box::pin(async move {
            sqlx::query("INSERT INTO items (name) VALUES ('during')")
               .execute(&mut **ctx)
               .await?;
            let blocked = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items")
               .fetch_one(&mut foreign)
               .await
               .is_err();
            Ok::<_, Error>((blocked, foreign))
         })
      })
      .await
      .unwrap();
   assert!(blocked, "a foreign reader got in while the write held the file");

   let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
      .fetch_one(&mut foreign)
      .await
      .unwrap();
   assert_eq!(count, 2);
   foreign.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_all_commit() {
   let (queue, _temp) = create_test_queue(None).await;
   let names = ["a", "b", "c", "d", "e", "f"];

   let mut handles = Vec::new();
   for name in names {
      let queue = Arc::clone(&queue);
      handles.push(tokio::spawn(async move { insert_item(&queue, name).await }));
   }
   for handle in handles {
      handle.await.unwrap().unwrap();
   }

   let mut stored = item_names(&queue).await;
   stored.sort();
   assert_eq!(stored, names);
   assert_eq!(queue.last_commit(), 7);
}

#[tokio::test]
async fn test_nested_access_fails_instead_of_deadlocking() {
   let (queue, _temp) = create_test_queue(None).await;

   let inner = Arc::clone(&queue);
   let nested = timeout(
      Duration::from_secs(2),
      queue.read(move |_ctx| {
         Box::pin(async move {
            let nested = inner
               .write(|_ctx| Box::pin(async move { Ok::<_, Error>(()) }))
               .await;
            Ok::<_, Error>(nested)
         })
      }),
   )
   .await
   .expect("nested access deadlocked")
   .unwrap();

   assert!(matches!(
      nested,
      Err(Error::Reentrancy {
         active: AccessKind::Read,
         requested: AccessKind::Write,
      })
   ));
}

#[tokio::test]
async fn test_access_on_another_manager_is_not_reentrant() {
   let (queue, _temp) = create_test_queue(None).await;
   let other_dir = TempDir::new().unwrap();
   let other = SqliteDatabase::connect(other_dir.path().join("other.db"), None)
      .await
      .unwrap();

   let copied = queue
      .read(move |_ctx| {
         Box::pin(async move {
            other
               .write(|ctx| {
                  Box::pin(async move {
                     sqlx::query("CREATE TABLE copied (id INTEGER PRIMARY KEY)")
                        .execute(&mut **ctx)
                        .await?;
                     Ok::<_, Error>(true)
                  })
               })
               .await
         })
      })
      .await
      .unwrap();

   assert!(copied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_write_is_rolled_back_before_next_access() {
   let (queue, _temp) = create_test_queue(None).await;
   let (started_tx, started_rx) = oneshot::channel::<()>();

   let abandoned_queue = Arc::clone(&queue);
   let abandoned = tokio::spawn(async move {
      abandoned_queue
         .write(move |ctx| {
            Box::pin(async move {
               sqlx::query("INSERT INTO items (name) VALUES ('abandoned')")
                  .execute(&mut **ctx)
                  .await?;
               let _ = started_tx.send(());
               std::future::pending::<()>().await;
               Ok::<_, Error>(())
            })
         })
         .await
   });
   started_rx.await.unwrap();
   abandoned.abort();
   assert!(abandoned.await.unwrap_err().is_cancelled());

   let (tx, mut rx) = mpsc::unbounded_channel();
   queue.on_commit(move |event| {
      let _ = tx.send(event.changes.clone());
   });

   insert_item(&queue, "kept").await.unwrap();

   assert_eq!(item_names(&queue).await, vec!["kept"]);
   let changes = timeout(Duration::from_secs(1), rx.recv())
      .await
      .unwrap()
      .unwrap();
   assert_eq!(changes.len(), 1);
   assert_eq!(changes[0].operation, ChangeOperation::Insert);
}

#[tokio::test]
async fn test_commit_event_lists_row_changes() {
   let (queue, _temp) = create_test_queue(None).await;
   let (tx, mut rx) = mpsc::unbounded_channel();
   queue.on_commit(move |event| {
      let _ = tx.send(event.clone());
   });

   let rowid = insert_item(&queue, "tracked").await.unwrap();
   queue
      .write(move |ctx| {
         Box::pin(async move {
            sqlx::query("DELETE FROM items WHERE id = ?")
               .bind(rowid)
               .execute(&mut **ctx)
               .await?;
            Ok::<_, Error>(())
         })
      })
      .await
      .unwrap();

   let inserted = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
   let deleted = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();

   assert_eq!(inserted.sequence + 1, deleted.sequence);
   assert!(inserted.touches("items"));
   assert_eq!(inserted.changes[0].rowid, rowid);
   assert_eq!(deleted.changes[0].operation, ChangeOperation::Delete);
   assert_eq!(deleted.changes[0].rowid, rowid);
}

#[tokio::test]
async fn test_generic_access_through_trait() {
   async fn count_items<D: DatabaseAccess>(db: &D) -> Result<i64, Error> {
      db.read(|ctx| {
         Box::pin(async move {
            let n = sqlx::query_scalar("SELECT COUNT(*) FROM items")
               .fetch_one(&mut **ctx)
               .await?;
            Ok(n)
         })
      })
      .await
   }

   let (queue, _temp) = create_test_queue(None).await;
   insert_item(&queue, "x").await.unwrap();

   assert_eq!(count_items(&*queue).await.unwrap(), 1);
}

#[tokio::test]
async fn test_connect_conflicts_with_pooled_manager() {
   let (queue, temp) = create_test_queue(None).await;

   let same = SqliteQueue::connect(temp.path().join("queue.db"), None)
      .await
      .unwrap();
   assert!(Arc::ptr_eq(&queue, &same));

   let pooled = SqliteDatabase::connect(temp.path().join("queue.db"), None).await;
   assert!(matches!(pooled, Err(Error::ManagerConflict(_))));

   // Once closed, the file may be reopened under the other strategy
   queue.close().await.unwrap();
   let pooled = SqliteDatabase::connect(temp.path().join("queue.db"), None).await;
   assert!(pooled.is_ok());
}

#[tokio::test]
async fn test_closed_queue_rejects_access() {
   let (queue, _temp) = create_test_queue(None).await;
   queue.close().await.unwrap();

   let result = insert_item(&queue, "late").await;
   assert!(matches!(result, Err(Error::DatabaseClosed)));
}
