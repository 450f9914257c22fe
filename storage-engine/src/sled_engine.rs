use async_trait::async_trait;
use idb_cache::engine::{ConnectionId, ConnectionTracker, version_error};
use idb_cache::ports::{
    Database, DatabaseInfo, DeleteOutcome, ObjectStore, Request, StorageEngine, Transaction,
    TransactionMode, TransactionSignal, UpgradeCallback, VersionChange,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::config::Config;
use shared::{EngineFault, Error, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

const META_TREE: &str = "__idb_cache_meta";
const SLED_DEFAULT_TREE: &[u8] = b"__sled__default";
const DEFAULT_FILE_NAME: &str = "idb-cache.sled";

/// Schema record kept per database in the metadata tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct DatabaseMeta {
    version: u32,
    /// Unique per creation, so a recreated database never shares trees with
    /// a deleted one still held open.
    incarnation: u64,
    stores: Vec<String>,
}

struct SledInner {
    db: sled::Db,
    meta: sled::Tree,
    tracker: ConnectionTracker,
    // held by open, delete and close so schema changes never interleave
    schema_lock: Mutex<()>,
}

/// Sled-based persistent engine
///
/// Every store is its own tree, keyed by database name, incarnation and store
/// name; the version and store list of each database live as JSON in a
/// metadata tree. Deleting a database that still has open connections removes
/// its metadata at once and drops its trees when the last connection closes.
#[derive(Clone)]
pub struct SledEngine {
    inner: Arc<SledInner>,
}

impl SledEngine {
    /// Open or create the engine at `path`.
    /// Creates the parent directory if it doesn't exist
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Connection(EngineFault::unknown(format!(
                    "Failed to create directory: {}",
                    e
                )))
            })?;
        }

        let db = sled::open(path).map_err(|e| Error::Connection(storage_fault(e)))?;
        Self::from_db(db)
    }

    /// Engine whose files are removed when it is dropped.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| Error::Connection(storage_fault(e)))?;
        Self::from_db(db)
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::open_path(Path::new(&config.data_dir).join(DEFAULT_FILE_NAME))
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| Error::Connection(storage_fault(e)))?;

        let inner = SledInner {
            db,
            meta,
            tracker: ConnectionTracker::new(),
            schema_lock: Mutex::new(()),
        };
        inner.purge_orphans().map_err(Error::Connection)?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Flushes dirty pages to disk, returning the number of bytes written.
    pub fn flush(&self) -> Result<usize> {
        self.inner
            .db
            .flush()
            .map_err(|e| Error::Request(storage_fault(e)))
    }

    pub fn open_connections(&self, name: &str) -> usize {
        self.inner.tracker.open_connections(name)
    }
}

impl std::fmt::Debug for SledEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledEngine")
            .field("tracker", &self.inner.tracker)
            .finish()
    }
}

impl SledInner {
    fn load_meta(&self, name: &str) -> std::result::Result<Option<DatabaseMeta>, EngineFault> {
        let value = self.meta.get(name.as_bytes()).map_err(storage_fault)?;

        match value {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                EngineFault::data(format!("Failed to deserialize schema of '{}': {}", name, e))
            }),
            None => Ok(None),
        }
    }

    fn save_meta(&self, name: &str, meta: &DatabaseMeta) -> std::result::Result<(), EngineFault> {
        let value = serde_json::to_vec(meta).map_err(|e| {
            EngineFault::data_clone(format!("Failed to serialize schema of '{}': {}", name, e))
        })?;

        self.meta
            .insert(name.as_bytes(), value)
            .map_err(storage_fault)?;
        self.db.flush().map_err(storage_fault)?;
        Ok(())
    }

    fn store_tree(
        &self,
        name: &str,
        meta: &DatabaseMeta,
        store: &str,
    ) -> std::result::Result<sled::Tree, EngineFault> {
        self.db
            .open_tree(tree_name(name, meta.incarnation, store))
            .map_err(storage_fault)
    }

    /// Drops every store tree of one incarnation of `name`.
    fn drop_trees(&self, name: &str, incarnation: u64) -> std::result::Result<usize, EngineFault> {
        let prefix = tree_prefix(name, incarnation);
        let mut dropped = 0;

        for tree in self.db.tree_names() {
            if tree.starts_with(&prefix) {
                self.db.drop_tree(&tree).map_err(storage_fault)?;
                dropped += 1;
            }
        }
        self.db.flush().map_err(storage_fault)?;
        Ok(dropped)
    }

    /// Drops trees no metadata entry refers to, left behind when the process
    /// stopped while a deleted database was still held open.
    fn purge_orphans(&self) -> std::result::Result<(), EngineFault> {
        let mut live = HashSet::new();
        for item in self.meta.iter() {
            let (key, value) = item.map_err(storage_fault)?;
            let name = String::from_utf8_lossy(&key).into_owned();
            let meta: DatabaseMeta = serde_json::from_slice(&value).map_err(|e| {
                EngineFault::data(format!("Failed to deserialize schema of '{}': {}", name, e))
            })?;
            for store in &meta.stores {
                live.insert(tree_name(&name, meta.incarnation, store));
            }
        }

        let mut purged = 0;
        for tree in self.db.tree_names() {
            let reserved =
                tree.as_ref() == META_TREE.as_bytes() || tree.as_ref() == SLED_DEFAULT_TREE;
            if !reserved && !live.contains(tree.as_ref()) {
                self.db.drop_tree(&tree).map_err(storage_fault)?;
                purged += 1;
            }
        }

        if purged > 0 {
            info!("Purged {} orphaned store tree(s)", purged);
        }
        Ok(())
    }
}

/// `<name length: u32 BE><name><incarnation: u64 BE>`, so no pair of names
/// can produce the same prefix.
fn tree_prefix(name: &str, incarnation: u64) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(name.len() + 12);
    prefix.extend_from_slice(&(name.len() as u32).to_be_bytes());
    prefix.extend_from_slice(name.as_bytes());
    prefix.extend_from_slice(&incarnation.to_be_bytes());
    prefix
}

fn tree_name(name: &str, incarnation: u64, store: &str) -> Vec<u8> {
    let mut tree = tree_prefix(name, incarnation);
    tree.extend_from_slice(store.as_bytes());
    tree
}

fn storage_fault(err: sled::Error) -> EngineFault {
    match err {
        sled::Error::CollectionNotFound(_) => {
            EngineFault::not_found(format!("Storage error: {}", err))
        }
        other => EngineFault::unknown(format!("Storage error: {}", other)),
    }
}

#[async_trait]
impl StorageEngine for SledEngine {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeCallback,
    ) -> std::result::Result<Arc<dyn Database>, EngineFault> {
        if version == 0 {
            return Err(EngineFault::type_error(
                "The version must be greater than zero.",
            ));
        }

        let _schema = self.inner.schema_lock.lock();
        let current = match self.inner.load_meta(name)? {
            Some(meta) => meta,
            None => DatabaseMeta {
                version: 0,
                incarnation: self.inner.db.generate_id().map_err(storage_fault)?,
                stores: Vec::new(),
            },
        };
        if version < current.version {
            return Err(version_error(version, current.version));
        }

        let meta = if version > current.version {
            let mut change = SledVersionChange {
                old_version: current.version,
                new_version: version,
                stores: current.stores.clone(),
            };
            upgrade(&mut change)?;

            let meta = DatabaseMeta {
                version,
                incarnation: current.incarnation,
                stores: change.stores,
            };
            for store in &meta.stores {
                self.inner.store_tree(name, &meta, store)?;
            }
            self.inner.save_meta(name, &meta)?;
            debug!(
                "Upgraded '{}' from version {} to {}",
                name, current.version, version
            );
            meta
        } else {
            current
        };

        let (connection, signal) = self.inner.tracker.connect(name);
        Ok(Arc::new(SledDatabase {
            inner: self.inner.clone(),
            connection,
            meta,
            signal,
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self, name: &str) -> std::result::Result<DeleteOutcome, EngineFault> {
        let _schema = self.inner.schema_lock.lock();
        let outcome = self.inner.tracker.request_delete(name);

        if let Some(meta) = self.inner.load_meta(name)? {
            self.inner
                .meta
                .remove(name.as_bytes())
                .map_err(storage_fault)?;
            // a blocked delete leaves the trees to the connections still open
            if outcome == DeleteOutcome::Deleted {
                self.inner.drop_trees(name, meta.incarnation)?;
            }
            self.inner.db.flush().map_err(storage_fault)?;
            info!("Deleted sled database '{}' ({:?})", name, outcome);
        }
        Ok(outcome)
    }

    async fn databases(&self) -> std::result::Result<Vec<DatabaseInfo>, EngineFault> {
        let mut infos = Vec::new();

        for item in self.inner.meta.iter() {
            let (key, value) = item.map_err(storage_fault)?;
            let name = String::from_utf8(key.to_vec())
                .map_err(|e| EngineFault::data(format!("Invalid database name: {}", e)))?;
            let meta: DatabaseMeta = serde_json::from_slice(&value).map_err(|e| {
                EngineFault::data(format!("Failed to deserialize schema of '{}': {}", name, e))
            })?;

            infos.push(DatabaseInfo {
                name,
                version: meta.version,
            });
        }

        Ok(infos)
    }
}

struct SledVersionChange {
    old_version: u32,
    new_version: u32,
    stores: Vec<String>,
}

impl VersionChange for SledVersionChange {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        let mut names = self.stores.clone();
        names.sort();
        names
    }

    fn create_store(&mut self, name: &str) -> std::result::Result<(), EngineFault> {
        if self.stores.iter().any(|store| store == name) {
            return Err(EngineFault::constraint(format!(
                "An object store with the name '{}' already exists.",
                name
            )));
        }
        self.stores.push(name.to_string());
        Ok(())
    }
}

struct SledDatabase {
    inner: Arc<SledInner>,
    connection: ConnectionId,
    meta: DatabaseMeta,
    signal: TransactionSignal,
    closed: AtomicBool,
}

impl Database for SledDatabase {
    fn name(&self) -> &str {
        self.connection.name()
    }

    fn version(&self) -> u32 {
        self.meta.version
    }

    fn store_names(&self) -> Vec<String> {
        let mut names = self.meta.stores.clone();
        names.sort();
        names
    }

    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> std::result::Result<Box<dyn Transaction>, EngineFault> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineFault::invalid_state(
                "The database connection is closing.",
            ));
        }
        if !self.meta.stores.iter().any(|s| s == store) {
            return Err(EngineFault::not_found(format!(
                "Object store '{}' was not found.",
                store
            )));
        }

        let tree = self
            .inner
            .store_tree(self.connection.name(), &self.meta, store)?;
        Ok(Box::new(SledTransaction {
            store: store.to_string(),
            tree,
            mode,
            signal: self.signal.clone(),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _schema = self.inner.schema_lock.lock();
        if !self.inner.tracker.disconnect(&self.connection) {
            return;
        }

        let name = self.connection.name();
        match self.inner.drop_trees(name, self.meta.incarnation) {
            Ok(dropped) => debug!(
                "Dropped {} tree(s) of deleted database '{}'",
                dropped, name
            ),
            Err(fault) => warn!("Deferred delete of '{}' failed: {}", name, fault),
        }
    }
}

impl Drop for SledDatabase {
    fn drop(&mut self) {
        self.close();
    }
}

struct SledTransaction {
    store: String,
    tree: sled::Tree,
    mode: TransactionMode,
    signal: TransactionSignal,
}

impl Transaction for SledTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn object_store(&self, name: &str) -> std::result::Result<Arc<dyn ObjectStore>, EngineFault> {
        if name != self.store {
            return Err(EngineFault::not_found(format!(
                "Object store '{}' is not in the transaction scope.",
                name
            )));
        }
        Ok(Arc::new(SledObjectStore {
            tree: self.tree.clone(),
            mode: self.mode,
        }))
    }

    fn signal(&self) -> TransactionSignal {
        self.signal.clone()
    }
}

struct SledObjectStore {
    tree: sled::Tree,
    mode: TransactionMode,
}

impl SledObjectStore {
    fn writable(&self) -> std::result::Result<&sled::Tree, EngineFault> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(&self.tree),
            TransactionMode::ReadOnly => {
                Err(EngineFault::read_only("The transaction is read-only."))
            }
        }
    }
}

impl ObjectStore for SledObjectStore {
    fn get(&self, key: &[u8]) -> Request<Option<Vec<u8>>> {
        Request::settled(
            self.tree
                .get(key)
                .map(|value| value.map(|v| v.to_vec()))
                .map_err(storage_fault),
        )
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Request<Vec<u8>> {
        Request::settled(self.writable().and_then(|tree| {
            tree.insert(key, value)
                .map(|_| key.to_vec())
                .map_err(storage_fault)
        }))
    }

    fn delete(&self, key: &[u8]) -> Request<()> {
        Request::settled(
            self.writable()
                .and_then(|tree| tree.remove(key).map(|_| ()).map_err(storage_fault)),
        )
    }

    fn clear(&self) -> Request<()> {
        Request::settled(
            self.writable()
                .and_then(|tree| tree.clear().map_err(storage_fault)),
        )
    }

    fn get_all_keys(&self) -> Request<Vec<Vec<u8>>> {
        Request::settled(
            self.tree
                .iter()
                .keys()
                .map(|key| key.map(|k| k.to_vec()))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(storage_fault),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idb_cache::adapt::get_store;
    use idb_cache::{CacheInstance, CacheOptions, ConnectionRegistry, ManualClock, TtlMs};

    fn create(stores: &'static [&'static str]) -> UpgradeCallback {
        Box::new(
            move |change: &mut dyn VersionChange| -> std::result::Result<(), EngineFault> {
                for store in stores {
                    if !change.store_names().iter().any(|s| s == *store) {
                        change.create_store(store)?;
                    }
                }
                Ok(())
            },
        )
    }

    #[tokio::test]
    async fn test_open_records_schema() {
        let engine = SledEngine::temporary().unwrap();
        let db = engine.open("app", 1, create(&["b", "a"])).await.unwrap();

        assert_eq!(db.version(), 1);
        assert_eq!(db.store_names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            engine.databases().await.unwrap(),
            vec![DatabaseInfo {
                name: "app".to_string(),
                version: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_lower_version_is_rejected() {
        let engine = SledEngine::temporary().unwrap();
        engine.open("app", 2, create(&["a"])).await.unwrap();

        let fault = engine.open("app", 1, create(&["a"])).await.err().unwrap();
        assert_eq!(fault.name, "VersionError");
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_old_schema() {
        let engine = SledEngine::temporary().unwrap();
        engine.open("app", 1, create(&["a"])).await.unwrap();

        let fault = engine
            .open(
                "app",
                2,
                Box::new(|change: &mut dyn VersionChange| change.create_store("a")),
            )
            .await
            .err()
            .unwrap();
        assert_eq!(fault.name, "ConstraintError");

        let db = engine.open("app", 1, create(&["a"])).await.unwrap();
        assert_eq!(db.version(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_keeps_records() {
        let engine = SledEngine::temporary().unwrap();
        let v1 = engine.open("app", 1, create(&["a"])).await.unwrap();
        let handle = get_store(v1.as_ref(), "a", TransactionMode::ReadWrite).unwrap();
        handle.put(b"k", b"v".to_vec()).await.unwrap();

        let v2 = engine.open("app", 2, create(&["a", "b"])).await.unwrap();
        let handle = get_store(v2.as_ref(), "a", TransactionMode::ReadOnly).unwrap();
        assert_eq!(handle.get(b"k").await.unwrap(), Some(b"v".to_vec()));
        assert!(get_store(v2.as_ref(), "b", TransactionMode::ReadOnly).is_ok());
    }

    #[tokio::test]
    async fn test_store_requests() {
        let engine = SledEngine::temporary().unwrap();
        let db = engine.open("app", 1, create(&["a"])).await.unwrap();
        let handle = get_store(db.as_ref(), "a", TransactionMode::ReadWrite).unwrap();

        for key in ["pear", "apple", "fig"] {
            handle.put(key.as_bytes(), Vec::new()).await.unwrap();
        }
        assert_eq!(
            handle.get_all_keys().await.unwrap(),
            vec![b"apple".to_vec(), b"fig".to_vec(), b"pear".to_vec()]
        );

        handle.delete(b"fig").await.unwrap();
        handle.delete(b"fig").await.unwrap();
        assert_eq!(handle.get(b"fig").await.unwrap(), None);

        handle.clear().await.unwrap();
        assert!(handle.get_all_keys().await.unwrap().is_empty());

        let read_only = get_store(db.as_ref(), "a", TransactionMode::ReadOnly).unwrap();
        let err = read_only.clear().await.unwrap_err();
        assert_eq!(err.name(), "ReadOnlyError");
    }

    #[tokio::test]
    async fn test_blocked_delete_keeps_new_writes() {
        let engine = SledEngine::temporary().unwrap();
        let old = engine.open("app", 1, create(&["a"])).await.unwrap();
        let old_handle = get_store(old.as_ref(), "a", TransactionMode::ReadWrite).unwrap();
        old_handle.put(b"k", b"old".to_vec()).await.unwrap();

        assert_eq!(
            engine.delete_database("app").await.unwrap(),
            DeleteOutcome::Blocked
        );
        assert!(engine.databases().await.unwrap().is_empty());
        assert_eq!(old_handle.get(b"k").await.unwrap(), Some(b"old".to_vec()));

        let fresh = engine.open("app", 1, create(&["a"])).await.unwrap();
        let handle = get_store(fresh.as_ref(), "a", TransactionMode::ReadWrite).unwrap();
        assert_eq!(handle.get(b"k").await.unwrap(), None);
        handle.put(b"k", b"new".to_vec()).await.unwrap();

        drop(old_handle);
        old.close();
        assert_eq!(engine.open_connections("app"), 1);
        fresh.close();

        let reopened = engine.open("app", 1, create(&["a"])).await.unwrap();
        let handle = get_store(reopened.as_ref(), "a", TransactionMode::ReadOnly).unwrap();
        assert_eq!(handle.get(b"k").await.unwrap(), Some(b"new".to_vec()));

        // only the live incarnation's tree is left
        let store_trees = engine
            .inner
            .db
            .tree_names()
            .into_iter()
            .filter(|tree| {
                tree.as_ref() != META_TREE.as_bytes() && tree.as_ref() != SLED_DEFAULT_TREE
            })
            .count();
        assert_eq!(store_trees, 1);
    }

    #[tokio::test]
    async fn test_names_with_separator_bytes_stay_apart() {
        let engine = SledEngine::temporary().unwrap();
        let left = engine.open("a\x1fb", 1, create(&["c"])).await.unwrap();
        let right = engine.open("a", 1, create(&["b\x1fc"])).await.unwrap();

        let left_store = get_store(left.as_ref(), "c", TransactionMode::ReadWrite).unwrap();
        let right_store = get_store(right.as_ref(), "b\x1fc", TransactionMode::ReadWrite).unwrap();
        left_store.put(b"k", b"left".to_vec()).await.unwrap();
        assert_eq!(right_store.get(b"k").await.unwrap(), None);

        drop(right_store);
        right.close();
        engine.delete_database("a").await.unwrap();
        assert_eq!(left_store.get(b"k").await.unwrap(), Some(b"left".to_vec()));
    }

    #[test]
    fn test_tree_names_are_unambiguous() {
        assert_ne!(tree_name("a\x1fb", 1, "c"), tree_name("a", 1, "b\x1fc"));
        assert_ne!(tree_name("ab", 1, "c"), tree_name("a", 1, "bc"));
        assert_ne!(tree_name("a", 1, "s"), tree_name("a", 2, "s"));
        assert!(tree_name("a", 1, "s").starts_with(&tree_prefix("a", 1)));
    }

    #[test]
    fn test_orphaned_trees_are_purged_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sled");
        let stray = tree_name("ghost", 7, "a");

        {
            let engine = SledEngine::open_path(&path).unwrap();
            let tree = engine.inner.db.open_tree(&stray).unwrap();
            tree.insert(b"k", b"v".to_vec()).unwrap();
            engine.flush().unwrap();
        }

        let engine = SledEngine::open_path(&path).unwrap();
        assert!(!engine.inner.db.tree_names().contains(&sled::IVec::from(stray)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_open_delete_and_close() {
        let engine = SledEngine::temporary().unwrap();

        let tasks: Vec<_> = (0..32u8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let db = engine.open("app", 1, create(&["a"])).await.unwrap();
                    let handle = get_store(db.as_ref(), "a", TransactionMode::ReadWrite).unwrap();
                    handle.put(&[i], vec![i]).await.unwrap();
                    if i % 4 == 0 {
                        engine.delete_database("app").await.unwrap();
                    }
                    drop(handle);
                    db.close();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(engine.open_connections("app"), 0);
        let db = engine.open("app", 1, create(&["a"])).await.unwrap();
        let handle = get_store(db.as_ref(), "a", TransactionMode::ReadWrite).unwrap();
        handle.put(b"last", Vec::new()).await.unwrap();
        assert!(handle.get_all_keys().await.unwrap().contains(&b"last".to_vec()));
    }

    #[tokio::test]
    async fn test_cache_over_sled() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let engine = SledEngine::temporary().unwrap();
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(engine.clone())));
        let clock = Arc::new(ManualClock::default());
        let cache = CacheInstance::<String>::new(
            registry,
            "app",
            ["A", "B"],
            CacheOptions::default()
                .with_max_age(TtlMs(1000))
                .with_clock(clock.clone()),
        )
        .unwrap();

        let store_a = cache.store("A").unwrap();
        store_a.put("k", &"v1".to_string()).await.unwrap();
        assert_eq!(store_a.get("k").await.unwrap(), Some("v1".to_string()));

        clock.advance_ms(1100);
        assert_eq!(store_a.get("k").await.unwrap(), None);
        assert_eq!(store_a.keys().await.unwrap(), vec!["k".to_string()]);
        assert!(cache.store("B").unwrap().keys().await.unwrap().is_empty());

        cache.destroy().await.unwrap();
        assert!(engine.databases().await.unwrap().is_empty());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sled");
        let runtime = || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
        };

        runtime().block_on(async {
            let engine = SledEngine::open_path(&path).unwrap();
            let registry = Arc::new(ConnectionRegistry::new(Arc::new(engine.clone())));
            let cache = CacheInstance::<String>::new(
                registry.clone(),
                "app",
                ["pages"],
                CacheOptions::default(),
            )
            .unwrap();

            cache.put("home", &"<html>".to_string()).await.unwrap();
            registry.teardown().await;
            engine.flush().unwrap();
        });

        runtime().block_on(async {
            let engine = SledEngine::open_path(&path).unwrap();
            let registry = Arc::new(ConnectionRegistry::new(Arc::new(engine.clone())));
            let cache = CacheInstance::<String>::new(
                registry,
                "app",
                ["pages"],
                CacheOptions::default(),
            )
            .unwrap();

            assert_eq!(cache.get("home").await.unwrap(), Some("<html>".to_string()));
            assert_eq!(
                engine.databases().await.unwrap(),
                vec![DatabaseInfo {
                    name: "app".to_string(),
                    version: 1
                }]
            );
        });
    }

    #[test]
    fn test_from_config_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().join("nested").display().to_string(),
            ..Config::default()
        };

        let engine = SledEngine::from_config(&config).unwrap();
        engine.flush().unwrap();
        assert!(dir.path().join("nested").join(DEFAULT_FILE_NAME).exists());
    }
}
