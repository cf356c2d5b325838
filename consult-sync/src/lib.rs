//! Consult Sync - Client-Side Data Synchronization
//!
//! Ties the request cache and the realtime channel together for front-ends:
//!
//! - [`SyncedQuery`]: cached data for one key, refetched on push events
//! - [`PrefetchOrchestrator`]: warms the cache right after login
//! - [`SyncClient`]: wires both from a [`SyncConfig`]
//!
//! ```ignore
//! let client = SyncClient::from_config(&config)?;
//! let bookings: SyncedQuery<Vec<Booking>> = client.query(
//!     HttpRequest::get("/api/bookings/user/42"),
//!     QueryOptions::new().topic("booking_update"),
//! );
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod prefetch;
pub mod query;
pub mod telemetry;

pub use client::SyncClient;
pub use config::{ConfigError, LogFormat, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use prefetch::{
    percent, PlannedQuery, PrefetchItemError, PrefetchOrchestrator, PrefetchPlan,
    PrefetchProgress, PrefetchReport,
};
pub use query::{
    CachedFetch, FnFetcher, QueryFetcher, QueryOptions, QueryState, SyncedQuery, Transform,
};
pub use telemetry::init_tracing;
