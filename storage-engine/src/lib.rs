//! Persistent engines for `idb-cache`.

pub mod sled_engine;

pub use sled_engine::SledEngine;

use idb_cache::ConnectionRegistry;
use shared::Result;
use shared::config::Config;
use std::sync::Arc;
use tracing::info;

/// Opens a sled engine under the configured data directory and wraps it in a
/// fresh registry.
pub fn registry_from_config(config: &Config) -> Result<Arc<ConnectionRegistry>> {
    let engine = SledEngine::from_config(config)?;
    info!("Sled engine ready in {}", config.data_dir);
    Ok(Arc::new(ConnectionRegistry::new(Arc::new(engine))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use idb_cache::{CacheInstance, CacheOptions};

    #[tokio::test]
    async fn test_registry_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().display().to_string(),
            default_version: 3,
            ..Config::default()
        };

        let registry = registry_from_config(&config).unwrap();
        let cache = CacheInstance::<u64>::new(
            registry.clone(),
            "counters",
            ["hits"],
            CacheOptions::from_config(&config),
        )
        .unwrap();

        cache.put("home", &7).await.unwrap();
        assert_eq!(cache.get("home").await.unwrap(), Some(7));

        let databases = registry.engine().databases().await.unwrap();
        assert_eq!(databases[0].version, 3);
        registry.teardown().await;
    }
}
