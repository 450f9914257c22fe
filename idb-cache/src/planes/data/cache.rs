use crate::adapt::{StoreHandle, get_store};
use crate::clock::Clock;
use crate::domain::{CacheOptions, Envelope};
use crate::planes::control::ConnectionRegistry;
use crate::ports::{Database, TransactionMode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{EngineFault, Error, Result, TtlMs};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

/// TTL cache over the stores of one named database
///
/// Operations without a store name go to the default store; use
/// [`CacheInstance::store`] for the others. Every operation resolves the
/// shared connection and runs in a transaction of its own.
///
/// `get` hides records older than `max_age` but never deletes them, and
/// `keys` lists them regardless of age.
pub struct CacheInstance<V = serde_json::Value> {
    registry: Arc<ConnectionRegistry>,
    name: String,
    stores: Vec<String>,
    version: u32,
    default_store: String,
    max_age: TtlMs,
    clock: Arc<dyn Clock>,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheInstance<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Validates the configuration and registers the database with the
    /// registry. Does not wait for the database to open.
    pub fn new<I, S>(
        registry: Arc<ConnectionRegistry>,
        name: impl Into<String>,
        stores: I,
        options: CacheOptions,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let stores: Vec<String> = stores.into_iter().map(Into::into).collect();

        let Some(first) = stores.first() else {
            return Err(Error::InvalidArgument(
                "`stores` must contain at least one store name".to_string(),
            ));
        };
        if options.version == 0 {
            return Err(Error::InvalidArgument(
                "`version` must be at least 1".to_string(),
            ));
        }
        let default_store = match options.default_store {
            Some(store) if !stores.contains(&store) => {
                return Err(Error::InvalidArgument(format!(
                    "default store '{}' is not one of {:?}",
                    store, stores
                )));
            }
            Some(store) => store,
            None => first.clone(),
        };

        // fire and remember; the first operation awaits it
        let _ = registry.resolve(&name, &stores, options.version);

        Ok(Self {
            registry,
            name,
            stores,
            version: options.version,
            default_store,
            max_age: options.max_age,
            clock: options.clock,
            _value: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stores(&self) -> &[String] {
        &self.stores
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn default_store(&self) -> &str {
        &self.default_store
    }

    pub fn max_age(&self) -> TtlMs {
        self.max_age
    }

    /// Completes once the shared connection is open.
    pub async fn ready(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    /// Scope for one of this instance's stores.
    pub fn store<'a>(&'a self, name: &'a str) -> Result<StoreScope<'a, V>> {
        if !self.stores.iter().any(|store| store == name) {
            return Err(Error::InvalidArgument(format!(
                "store '{}' is not one of {:?}",
                name, self.stores
            )));
        }
        Ok(StoreScope { cache: self, store: name })
    }

    fn default_scope(&self) -> StoreScope<'_, V> {
        StoreScope {
            cache: self,
            store: &self.default_store,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        self.default_scope().get(key).await
    }

    pub async fn put(&self, key: &str, value: &V) -> Result<String> {
        self.default_scope().put(key, value).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.default_scope().delete(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.default_scope().clear().await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.default_scope().keys().await
    }

    /// Deletes the whole database, whatever stores this instance lists.
    /// Succeeds even when the engine reports the delete as blocked.
    pub async fn destroy(&self) -> Result<()> {
        self.registry.destroy(&self.name).await.map(|_| ())
    }

    async fn connection(&self) -> Result<Arc<dyn Database>> {
        self.registry
            .resolve(&self.name, &self.stores, self.version)
            .await
    }
}

impl<V> Clone for CacheInstance<V> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            stores: self.stores.clone(),
            version: self.version,
            default_store: self.default_store.clone(),
            max_age: self.max_age,
            clock: self.clock.clone(),
            _value: PhantomData,
        }
    }
}

impl<V> Debug for CacheInstance<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInstance")
            .field("name", &self.name)
            .field("stores", &self.stores)
            .field("version", &self.version)
            .field("default_store", &self.default_store)
            .field("max_age", &self.max_age)
            .finish()
    }
}

/// Operations against one store of a [`CacheInstance`]
pub struct StoreScope<'a, V> {
    cache: &'a CacheInstance<V>,
    store: &'a str,
}

impl<V> StoreScope<'_, V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn name(&self) -> &str {
        self.store
    }

    /// The value stored under `key`, or `None` if absent or older than max age.
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        let handle = self.open(TransactionMode::ReadOnly).await?;
        let Some(bytes) = handle.get(key.as_bytes()).await? else {
            return Ok(None);
        };

        let envelope = Envelope::<V>::decode(&bytes).map_err(Error::Request)?;
        if envelope.is_fresh(self.cache.clock.now(), self.cache.max_age) {
            Ok(Some(envelope.value))
        } else {
            tracing::debug!(
                "Record '{}' in '{}/{}' is older than {} ms",
                key,
                self.cache.name,
                self.store,
                self.cache.max_age.0
            );
            Ok(None)
        }
    }

    /// Writes `value` stamped with the current time, replacing any record
    /// under `key`. Returns the key.
    pub async fn put(&self, key: &str, value: &V) -> Result<String> {
        let bytes = Envelope::new(value, self.cache.clock.now())
            .encode()
            .map_err(Error::Request)?;

        let handle = self.open(TransactionMode::ReadWrite).await?;
        let written = handle.put(key.as_bytes(), bytes).await?;
        decode_key(written)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let handle = self.open(TransactionMode::ReadWrite).await?;
        handle.delete(key.as_bytes()).await
    }

    pub async fn clear(&self) -> Result<()> {
        let handle = self.open(TransactionMode::ReadWrite).await?;
        handle.clear().await?;
        tracing::debug!("Cleared '{}/{}'", self.cache.name, self.store);
        Ok(())
    }

    /// Every key in ascending order, including records `get` treats as expired.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let handle = self.open(TransactionMode::ReadOnly).await?;
        handle
            .get_all_keys()
            .await?
            .into_iter()
            .map(decode_key)
            .collect()
    }

    async fn open(&self, mode: TransactionMode) -> Result<StoreHandle> {
        let db = self.cache.connection().await?;
        get_store(db.as_ref(), self.store, mode)
    }
}

fn decode_key(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        Error::Request(EngineFault::data(format!(
            "Stored key is not valid UTF-8: {}",
            e
        )))
    })
}
