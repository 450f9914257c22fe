use crate::TtlMs;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub data_dir: String,
    pub default_version: u32,
    pub default_max_age: TtlMs,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: Self::DEFAULT_DATA_DIR.to_string(),
            default_version: Self::DEFAULT_VERSION,
            default_max_age: TtlMs(Self::DEFAULT_MAX_AGE_MS),
        }
    }
}

impl Config {
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_VERSION: u32 = 1;
    const DEFAULT_MAX_AGE_MS: u64 = 86_400_000; // 24 hours

    /// Loads an optional `.env` file, then reads the process environment.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment variables from {}", path.display()),
            Err(_) => info!("No .env file found, using system environment variables"),
        }
        Self::from_env()
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let version = parse_or(&lookup, "IDB_CACHE_VERSION", Self::DEFAULT_VERSION);
        let default_version = if version == 0 {
            warn!("IDB_CACHE_VERSION must be at least 1, using {}", Self::DEFAULT_VERSION);
            Self::DEFAULT_VERSION
        } else {
            version
        };

        Self {
            data_dir: lookup("IDB_CACHE_DATA_DIR")
                .unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            default_version,
            default_max_age: TtlMs(parse_or(
                &lookup,
                "IDB_CACHE_MAX_AGE_MS",
                Self::DEFAULT_MAX_AGE_MS,
            )),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using {}", key, raw, default);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.default_max_age, TtlMs(86_400_000));
        assert_eq!(config.default_version, 1);
    }

    #[test]
    fn test_reads_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("IDB_CACHE_DATA_DIR", "/var/lib/idb-cache"),
            ("IDB_CACHE_VERSION", "3"),
            ("IDB_CACHE_MAX_AGE_MS", " 1000 "),
        ]));
        assert_eq!(config.data_dir, "/var/lib/idb-cache");
        assert_eq!(config.default_version, 3);
        assert_eq!(config.default_max_age, TtlMs(1000));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("IDB_CACHE_VERSION", "0"),
            ("IDB_CACHE_MAX_AGE_MS", "soon"),
        ]));
        assert_eq!(config.default_version, 1);
        assert_eq!(config.default_max_age, TtlMs(86_400_000));
    }
}
