use crate::ports::{Database, DeleteOutcome, StorageEngine, UpgradeCallback, VersionChange};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use shared::{EngineFault, Error, Result};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A connection that may still be opening. Every clone settles with the same result.
pub type PendingConnection = Shared<BoxFuture<'static, Result<Arc<dyn Database>>>>;

/// ConnectionRegistry hands out one shared connection per database name
///
/// The first `resolve` for a name starts the open and registers it before it
/// completes; later calls get the same pending result whatever stores or
/// version they ask for. A failed open stays failed until the name is evicted.
pub struct ConnectionRegistry {
    engine: Arc<dyn StorageEngine>,
    // Maps database name -> shared open result
    connections: DashMap<String, PendingConnection>,
}

impl Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            engine,
            connections: DashMap::new(),
        }
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Returns the shared connection for `name`, starting the open if this is
    /// the first request for it. Inside a Tokio runtime the open runs in the
    /// background straight away; otherwise it runs on first await.
    pub fn resolve(&self, name: &str, stores: &[String], version: u32) -> PendingConnection {
        if let Some(existing) = self.connections.get(name) {
            return existing.value().clone();
        }

        self.connections
            .entry(name.to_string())
            .or_insert_with(|| self.begin_open(name, stores, version))
            .value()
            .clone()
    }

    fn begin_open(&self, name: &str, stores: &[String], version: u32) -> PendingConnection {
        info!("Opening database '{}' at version {}", name, version);

        let pending = open_database(
            self.engine.clone(),
            name.to_string(),
            stores.to_vec(),
            version,
        )
        .boxed()
        .shared();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(pending.clone());
        }

        pending
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Forgets `name` and closes its connection if the open succeeded.
    pub async fn evict(&self, name: &str) -> bool {
        let Some((_, pending)) = self.connections.remove(name) else {
            return false;
        };

        if let Ok(db) = pending.await {
            db.close();
        }
        info!("Evicted connection to '{}'", name);
        true
    }

    /// Evicts every connection.
    pub async fn teardown(&self) {
        let names: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for name in names {
            self.evict(&name).await;
        }
    }

    /// Evicts `name`, then deletes the database. A delete blocked by a
    /// connection held elsewhere is reported, not waited on.
    pub async fn destroy(&self, name: &str) -> Result<DeleteOutcome> {
        self.evict(name).await;

        let outcome = self
            .engine
            .delete_database(name)
            .await
            .map_err(Error::Request)?;

        match outcome {
            DeleteOutcome::Deleted => info!("Deleted database '{}'", name),
            DeleteOutcome::Blocked => warn!(
                "Delete of database '{}' is blocked by open connections; it completes once they close",
                name
            ),
        }
        Ok(outcome)
    }
}

async fn open_database(
    engine: Arc<dyn StorageEngine>,
    name: String,
    stores: Vec<String>,
    version: u32,
) -> Result<Arc<dyn Database>> {
    let db_name = name.clone();
    let upgrade: UpgradeCallback = Box::new(
        move |change: &mut dyn VersionChange| -> std::result::Result<(), EngineFault> {
            debug!(
                "Upgrading '{}' from version {} to {}",
                db_name,
                change.old_version(),
                change.new_version()
            );
            for store in &stores {
                if !change.store_names().contains(store) {
                    debug!("Creating store '{}' in '{}'", store, db_name);
                    change.create_store(store)?;
                }
            }
            Ok(())
        },
    );

    match engine.open(&name, version, upgrade).await {
        Ok(db) => {
            debug!("Opened database '{}' at version {}", name, db.version());
            Ok(db)
        }
        Err(fault) => {
            warn!("Failed to open database '{}': {}", name, fault);
            Err(Error::Connection(fault))
        }
    }
}
