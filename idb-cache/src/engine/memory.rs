use crate::engine::lifecycle::{ConnectionId, ConnectionTracker};
use crate::ports::{
    Database, DatabaseInfo, DeleteOutcome, ObjectStore, Request, StorageEngine, Transaction,
    TransactionMode, TransactionSignal, UpgradeCallback, VersionChange,
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::EngineFault;
use std::collections::BTreeMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

type Records = BTreeMap<Vec<u8>, Vec<u8>>;
type SharedRecords = Arc<RwLock<Records>>;

struct Schema {
    version: u32,
    stores: BTreeMap<String, SharedRecords>,
}

impl Schema {
    fn empty() -> Self {
        Self {
            version: 0,
            stores: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct MemoryInner {
    databases: DashMap<String, Arc<Schema>>,
    tracker: ConnectionTracker,
    // held by open, delete and close so schema changes never interleave
    schema_lock: Mutex<()>,
}

/// In-process engine keeping every store in an ordered map.
/// Clones share the same databases.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<MemoryInner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every transaction, current and future, of the connections
    /// currently open to `name`. Returns false if `name` was never opened.
    pub fn fail_connections(&self, name: &str, fault: EngineFault) -> bool {
        self.inner.tracker.fail(name, fault)
    }

    pub fn open_connections(&self, name: &str) -> usize {
        self.inner.tracker.open_connections(name)
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("databases", &self.inner.databases.len())
            .finish()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeCallback,
    ) -> Result<Arc<dyn Database>, EngineFault> {
        if version == 0 {
            return Err(EngineFault::type_error(
                "The version must be greater than zero.",
            ));
        }

        let _schema = self.inner.schema_lock.lock();
        let schema = match self.inner.databases.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().clone();
                if version < current.version {
                    return Err(version_error(version, current.version));
                }
                if version > current.version {
                    let upgraded = Arc::new(upgrade_schema(&current, version, upgrade)?);
                    occupied.insert(upgraded.clone());
                    upgraded
                } else {
                    current
                }
            }
            Entry::Vacant(vacant) => {
                let created = Arc::new(upgrade_schema(&Schema::empty(), version, upgrade)?);
                vacant.insert(created.clone());
                created
            }
        };

        let (connection, signal) = self.inner.tracker.connect(name);
        Ok(Arc::new(MemoryDatabase {
            inner: self.inner.clone(),
            connection,
            schema,
            signal,
            closed: AtomicBool::new(false),
        }))
    }

    async fn delete_database(&self, name: &str) -> Result<DeleteOutcome, EngineFault> {
        let _schema = self.inner.schema_lock.lock();
        let outcome = self.inner.tracker.request_delete(name);
        // a blocked delete detaches the schema; open connections keep their Arc
        if self.inner.databases.remove(name).is_some() {
            info!("Deleted in-memory database '{}' ({:?})", name, outcome);
        }
        Ok(outcome)
    }

    async fn databases(&self) -> Result<Vec<DatabaseInfo>, EngineFault> {
        let mut infos: Vec<DatabaseInfo> = self
            .inner
            .databases
            .iter()
            .map(|entry| DatabaseInfo {
                name: entry.key().clone(),
                version: entry.value().version,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

pub fn version_error(requested: u32, existing: u32) -> EngineFault {
    EngineFault::version(format!(
        "The requested version ({}) is less than the existing version ({}).",
        requested, existing
    ))
}

fn upgrade_schema(
    current: &Schema,
    version: u32,
    upgrade: UpgradeCallback,
) -> Result<Schema, EngineFault> {
    let mut change = MemoryVersionChange {
        old_version: current.version,
        new_version: version,
        stores: current.stores.clone(),
    };
    upgrade(&mut change)?;

    debug!(
        "Upgraded in-memory schema from version {} to {}",
        current.version, version
    );
    Ok(Schema {
        version,
        stores: change.stores,
    })
}

struct MemoryVersionChange {
    old_version: u32,
    new_version: u32,
    stores: BTreeMap<String, SharedRecords>,
}

impl VersionChange for MemoryVersionChange {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn create_store(&mut self, name: &str) -> Result<(), EngineFault> {
        if self.stores.contains_key(name) {
            return Err(EngineFault::constraint(format!(
                "An object store with the name '{}' already exists.",
                name
            )));
        }
        self.stores.insert(name.to_string(), SharedRecords::default());
        Ok(())
    }
}

struct MemoryDatabase {
    inner: Arc<MemoryInner>,
    connection: ConnectionId,
    schema: Arc<Schema>,
    signal: TransactionSignal,
    closed: AtomicBool,
}

impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        self.connection.name()
    }

    fn version(&self) -> u32 {
        self.schema.version
    }

    fn store_names(&self) -> Vec<String> {
        self.schema.stores.keys().cloned().collect()
    }

    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>, EngineFault> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineFault::invalid_state(
                "The database connection is closing.",
            ));
        }
        let records = self.schema.stores.get(store).cloned().ok_or_else(|| {
            EngineFault::not_found(format!("Object store '{}' was not found.", store))
        })?;

        Ok(Box::new(MemoryTransaction {
            store: store.to_string(),
            records,
            mode,
            signal: self.signal.clone(),
        }))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _schema = self.inner.schema_lock.lock();
        if self.inner.tracker.disconnect(&self.connection) {
            debug!(
                "Released deleted generation {} of '{}'",
                self.connection.generation(),
                self.connection.name()
            );
        }
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryTransaction {
    store: String,
    records: SharedRecords,
    mode: TransactionMode,
    signal: TransactionSignal,
}

impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn object_store(&self, name: &str) -> Result<Arc<dyn ObjectStore>, EngineFault> {
        if name != self.store {
            return Err(EngineFault::not_found(format!(
                "Object store '{}' is not in the transaction scope.",
                name
            )));
        }
        Ok(Arc::new(MemoryObjectStore {
            records: self.records.clone(),
            mode: self.mode,
        }))
    }

    fn signal(&self) -> TransactionSignal {
        self.signal.clone()
    }
}

struct MemoryObjectStore {
    records: SharedRecords,
    mode: TransactionMode,
}

impl MemoryObjectStore {
    fn read<T>(&self, op: impl FnOnce(&Records) -> T) -> Result<T, EngineFault> {
        Ok(op(&self.records.read()))
    }

    fn write<T>(&self, op: impl FnOnce(&mut Records) -> T) -> Result<T, EngineFault> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(EngineFault::read_only("The transaction is read-only."));
        }
        Ok(op(&mut self.records.write()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &[u8]) -> Request<Option<Vec<u8>>> {
        Request::settled(self.read(|records| records.get(key).cloned()))
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Request<Vec<u8>> {
        Request::settled(self.write(|records| {
            records.insert(key.to_vec(), value);
            key.to_vec()
        }))
    }

    fn delete(&self, key: &[u8]) -> Request<()> {
        Request::settled(self.write(|records| {
            records.remove(key);
        }))
    }

    fn clear(&self) -> Request<()> {
        Request::settled(self.write(|records| records.clear()))
    }

    fn get_all_keys(&self) -> Request<Vec<Vec<u8>>> {
        Request::settled(self.read(|records| records.keys().cloned().collect()))
    }
}
