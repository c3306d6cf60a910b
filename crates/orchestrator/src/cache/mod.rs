//! Generation cache
//!
//! Bounded LRU stores for generated images (JPEG-compressed) and text, keyed
//! by request fingerprint.

pub mod generation_cache;
pub mod lru;

pub use generation_cache::{CacheConfig, CacheStats, GenerationCache};
pub use self::lru::BoundedLru;
