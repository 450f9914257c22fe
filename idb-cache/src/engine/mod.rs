//! Engine building blocks and the in-process reference engine.

pub mod lifecycle;
pub mod memory;

pub use lifecycle::{ConnectionId, ConnectionTracker};
pub use memory::{MemoryEngine, version_error};
