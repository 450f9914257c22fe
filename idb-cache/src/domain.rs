use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::config::Config;
use shared::{EngineFault, TtlMs};
use std::sync::Arc;

/// Persisted wrapper around a caller's value, stamped with its write time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<V> {
    pub value: V,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
}

impl<V> Envelope<V> {
    pub fn new(value: V, time: DateTime<Utc>) -> Self {
        Self { value, time }
    }

    /// Fresh while `now - time` is strictly below `max_age`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: TtlMs) -> bool {
        let elapsed = (now - self.time).num_milliseconds();
        elapsed < i64::try_from(max_age.0).unwrap_or(i64::MAX)
    }
}

impl<V: Serialize> Envelope<V> {
    pub fn encode(&self) -> Result<Vec<u8>, EngineFault> {
        serde_json::to_vec(self)
            .map_err(|e| EngineFault::data_clone(format!("Failed to serialize record: {}", e)))
    }
}

impl<V: DeserializeOwned> Envelope<V> {
    pub fn decode(bytes: &[u8]) -> Result<Self, EngineFault> {
        serde_json::from_slice(bytes)
            .map_err(|e| EngineFault::data(format!("Failed to deserialize record: {}", e)))
    }
}

/// Optional settings for a cache instance
#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub version: u32,
    /// First store when `None`.
    pub default_store: Option<String>,
    pub max_age: TtlMs,
    pub clock: Arc<dyn Clock>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            version: 1,
            default_store: None,
            max_age: TtlMs::ONE_DAY,
            clock: Arc::new(SystemClock),
        }
    }
}

impl CacheOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            version: config.default_version,
            max_age: config.default_max_age,
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_default_store(mut self, store: impl Into<String>) -> Self {
        self.default_store = Some(store.into());
        self
    }

    pub fn with_max_age(mut self, max_age: TtlMs) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
