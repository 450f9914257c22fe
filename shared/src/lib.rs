// shared/src/lib.rs

use std::time::Duration;

/// Failure reported by a storage engine, named the way engines name them
/// (`NotFoundError`, `ConstraintError`, `VersionError`, ...).
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{name}: {message}")]
pub struct EngineFault {
    pub name: String,
    pub message: String,
}

impl EngineFault {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new("AbortError", message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new("ConstraintError", message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new("DataError", message)
    }

    pub fn data_clone(message: impl Into<String>) -> Self {
        Self::new("DataCloneError", message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new("InvalidStateError", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFoundError", message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new("ReadOnlyError", message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new("UnknownError", message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new("VersionError", message)
    }
}

// Cloneable so one shared open result can be handed to every waiter
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("connection failed: {0}")]
    Connection(EngineFault),
    #[error("transaction failed: {0}")]
    Transaction(EngineFault),
    #[error("request failed: {0}")]
    Request(EngineFault),
}

impl Error {
    /// Engine-style error name, e.g. `VersionError`.
    pub fn name(&self) -> &str {
        match self {
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::Connection(fault) | Error::Transaction(fault) | Error::Request(fault) => {
                &fault.name
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::InvalidArgument(message) => message,
            Error::Connection(fault) | Error::Transaction(fault) | Error::Request(fault) => {
                &fault.message
            }
        }
    }

    pub fn fault(&self) -> Option<&EngineFault> {
        match self {
            Error::InvalidArgument(_) => None,
            Error::Connection(fault) | Error::Transaction(fault) | Error::Request(fault) => {
                Some(fault)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maximum record age in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtlMs(pub u64);

impl TtlMs {
    pub const ONE_DAY: TtlMs = TtlMs(86_400_000);

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl From<Duration> for TtlMs {
    fn from(duration: Duration) -> Self {
        TtlMs(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

pub mod config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exposes_engine_name_and_message() {
        let err = Error::Connection(EngineFault::version(
            "The requested version (1) is less than the existing version (2).",
        ));
        assert_eq!(err.name(), "VersionError");
        assert!(err.message().contains("existing version (2)"));
        assert_eq!(err.fault().map(|f| f.name.as_str()), Some("VersionError"));
    }

    #[test]
    fn test_invalid_argument_has_no_fault() {
        let err = Error::InvalidArgument("stores must not be empty".to_string());
        assert_eq!(err.name(), "InvalidArgument");
        assert_eq!(err.message(), "stores must not be empty");
        assert!(err.fault().is_none());
        assert_eq!(err.to_string(), "invalid argument: stores must not be empty");
    }

    #[test]
    fn test_ttl_from_duration() {
        assert_eq!(TtlMs::from(Duration::from_secs(2)), TtlMs(2000));
        assert_eq!(TtlMs::ONE_DAY.as_duration(), Duration::from_secs(86_400));
    }
}
