//! One manager per database file per process.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use tokio::sync::Mutex;
use tracing::debug;

use crate::database::SqliteDatabase;
use crate::error::{Error, Result};
use crate::queue::SqliteQueue;

/// A live (or formerly live) manager for one database path
pub(crate) enum OpenManager {
   Queue(Weak<SqliteQueue>),
   Pool(Weak<SqliteDatabase>),
}

impl OpenManager {
   fn is_live(&self) -> bool {
      match self {
         OpenManager::Queue(queue) => queue.upgrade().is_some_and(|q| !q.is_closed()),
         OpenManager::Pool(pool) => pool.upgrade().is_some_and(|p| !p.is_closed()),
      }
   }
}

/// Implemented by both managers so the registry can hand out existing instances
pub(crate) trait Registered: Sized {
   fn entry(manager: &Arc<Self>) -> OpenManager;

   fn from_entry(entry: &OpenManager) -> Option<Arc<Self>>;

   fn is_closed(&self) -> bool;
}

impl Registered for SqliteDatabase {
   fn entry(manager: &Arc<Self>) -> OpenManager {
      OpenManager::Pool(Arc::downgrade(manager))
   }

   fn from_entry(entry: &OpenManager) -> Option<Arc<Self>> {
      match entry {
         OpenManager::Pool(pool) => pool.upgrade(),
         OpenManager::Queue(_) => None,
      }
   }

   fn is_closed(&self) -> bool {
      SqliteDatabase::is_closed(self)
   }
}

impl Registered for SqliteQueue {
   fn entry(manager: &Arc<Self>) -> OpenManager {
      OpenManager::Queue(Arc::downgrade(manager))
   }

   fn from_entry(entry: &OpenManager) -> Option<Arc<Self>> {
      match entry {
         OpenManager::Queue(queue) => queue.upgrade(),
         OpenManager::Pool(_) => None,
      }
   }

   fn is_closed(&self) -> bool {
      SqliteQueue::is_closed(self)
   }
}

static OPEN_DATABASES: LazyLock<Mutex<HashMap<PathBuf, OpenManager>>> =
   LazyLock::new(|| Mutex::new(HashMap::new()));

/// Returns the live manager for `path`, or opens a new one with `open`.
///
/// The registry lock is held while opening so two concurrent connects to the
/// same file cannot both create a manager.
pub(crate) async fn connect_shared<M, F, Fut>(path: &Path, open: F) -> Result<Arc<M>>
where
   M: Registered,
   F: FnOnce(PathBuf) -> Fut,
   Fut: Future<Output = Result<Arc<M>>>,
{
   let key = resolve_database_path(path).await?;
   let mut open_databases = OPEN_DATABASES.lock().await;

   if let Some(entry) = open_databases.get(&key) {
      match M::from_entry(entry) {
         Some(existing) if !existing.is_closed() => {
            debug!(path = %key.display(), "Reusing open database manager; new configuration ignored");
            return Ok(existing);
         }
         Some(_) => {}
         None if entry.is_live() => return Err(Error::ManagerConflict(key)),
         None => {}
      }
   }

   let manager = open(key.clone()).await?;
   open_databases.insert(key, M::entry(&manager));
   Ok(manager)
}

/// The one path every alias of a database file resolves to: the parent
/// directory (created if missing) with `..` and symlinks resolved, plus the
/// file name.
async fn resolve_database_path(path: &Path) -> Result<PathBuf> {
   let absolute = std::path::absolute(path)?;
   let (Some(parent), Some(file_name)) = (absolute.parent(), absolute.file_name()) else {
      return Err(Error::Io(std::io::Error::new(
         ErrorKind::InvalidInput,
         format!("not a database file path: {}", path.display()),
      )));
   };

   tokio::fs::create_dir_all(parent).await?;
   let parent = tokio::fs::canonicalize(parent).await?;
   Ok(parent.join(file_name))
}

/// Removes `manager`'s entry, leaving any newer manager for the path alone
pub(crate) async fn forget<M: Registered>(path: &Path, manager: &M) {
   let mut open_databases = OPEN_DATABASES.lock().await;
   let is_same = open_databases
      .get(path)
      .and_then(M::from_entry)
      .is_some_and(|registered| std::ptr::eq(Arc::as_ptr(&registered), manager));

   if is_same {
      open_databases.remove(path);
   }
}

/// Deletes the database file and its WAL side files
pub(crate) async fn remove_database_files(path: &Path) -> Result<()> {
   let mut files = vec![path.to_path_buf()];
   for suffix in ["-wal", "-shm", "-journal"] {
      let mut name = path.as_os_str().to_owned();
      name.push(suffix);
      files.push(PathBuf::from(name));
   }

   for file in files {
      match tokio::fs::remove_file(&file).await {
         Ok(()) => debug!(file = %file.display(), "Removed database file"),
         Err(e) if e.kind() == ErrorKind::NotFound => {}
         Err(e) => return Err(Error::Io(e)),
      }
   }

   Ok(())
}
