pub mod cache;

pub use cache::{CacheInstance, StoreScope};
