//! Response caching
//!
//! - [`ttl`]: in-memory cache with per-entry expiry

pub mod ttl;

pub use ttl::{CacheStats, TtlCache};
