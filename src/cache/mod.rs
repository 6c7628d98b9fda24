// Cache module for query results.
// Query keys, cache entries and the subscribable store that holds them.

pub mod key;
pub mod store;

pub use key::{KeyPart, KeyPattern, QueryKey};
pub use store::{CacheEntry, CacheStore, QueryStatus, StaleTime, Subscription};
