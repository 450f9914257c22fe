//! Promise-style TTL cache over an asynchronous, transactional, versioned
//! key-value engine.
//!
//! A [`ConnectionRegistry`] keeps one shared connection per database name.
//! [`CacheInstance`]s built on it read and write `{ value, time }` envelopes
//! and hide records older than their max age on read.

pub mod adapt;
pub mod clock;
pub mod domain;
pub mod engine;
pub mod planes;
pub mod ports;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{CacheOptions, Envelope};
pub use engine::MemoryEngine;
pub use planes::control::{ConnectionRegistry, PendingConnection};
pub use planes::data::{CacheInstance, StoreScope};
pub use shared::{EngineFault, Error, Result, TtlMs};
