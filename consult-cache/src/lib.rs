//! Request cache for the Consult REST backend.
//!
//! [`KeyedRequestCache`] sits between callers and an [`HttpTransport`]. It
//! serves recent results without touching the network, lets the newest call
//! for a key supersede any older call still in flight, and counts every call
//! per URL path in a [`RequestCounter`].
//!
//! # TTL tiers
//!
//! One cache abstraction serves every tier; the TTL is chosen per write and
//! stored with the entry. [`CacheConfig`] carries the three tiers in use:
//!
//! - `request_ttl` (5 s): plain `request` calls from the raw client
//! - `query_ttl` (10 min): fetches issued by synced queries
//! - `prefetch_ttl` (5 min): entries warmed right after login
//!
//! # Example
//!
//! ```ignore
//! let cache = KeyedRequestCache::new(Arc::new(transport), CacheConfig::default());
//! let courses = cache.get_json("/api/courses").await?;
//! ```

pub mod config;
pub mod counter;
pub mod keyed;
pub mod transport;

pub use config::CacheConfig;
pub use counter::RequestCounter;
pub use keyed::{CacheEntry, KeyedRequestCache};
pub use transport::{HttpTransport, RestConfig, RestTransport};
