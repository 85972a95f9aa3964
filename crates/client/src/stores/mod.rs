//! Client-side stores for server-derived state.

pub mod cache;

pub use cache::{CacheEntry, CacheEvent, CacheKey, QueryCache, RegionLoader};
