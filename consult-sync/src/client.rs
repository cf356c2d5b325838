//! The sync client: one cache, one channel, one session store.

use std::sync::Arc;

use consult_cache::{KeyedRequestCache, RestTransport};
use consult_core::{FileSessionStore, HttpRequest, SessionStore};
use consult_realtime::{get_channel_with, RealtimeChannel};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::prefetch::PrefetchOrchestrator;
use crate::query::{CachedFetch, QueryOptions, SyncedQuery};

/// Entry point for front-ends.
///
/// Everything handed out by the client shares the same cache and channel, so
/// queries built from it deduplicate against each other and against the
/// login prefetch.
#[derive(Clone)]
pub struct SyncClient {
    cache: KeyedRequestCache,
    channel: Arc<RealtimeChannel>,
    session: Arc<dyn SessionStore>,
    prefetch: PrefetchOrchestrator,
}

impl SyncClient {
    /// Build the production client: reqwest transport, the process-wide
    /// realtime channel, and a file-backed session store.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let transport = RestTransport::new(&config.rest_config())?;
        let session = FileSessionStore::load(&config.session_path)?;
        let channel = get_channel_with(
            &config.ws_endpoint,
            config.reconnect.clone(),
            config.auth.bearer_token.clone(),
        );
        let cache = KeyedRequestCache::new(Arc::new(transport), config.cache_config());

        info!(
            api_base_url = %config.api_base_url,
            ws_endpoint = %config.ws_endpoint,
            session_path = %config.session_path.display(),
            "Sync client ready"
        );
        Ok(Self::new(cache, channel, Arc::new(session)))
    }

    pub fn new(
        cache: KeyedRequestCache,
        channel: Arc<RealtimeChannel>,
        session: Arc<dyn SessionStore>,
    ) -> Self {
        let prefetch = PrefetchOrchestrator::new(cache.clone(), Arc::clone(&session));
        Self {
            cache,
            channel,
            session,
            prefetch,
        }
    }

    pub fn cache(&self) -> &KeyedRequestCache {
        &self.cache
    }

    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.channel
    }

    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    pub fn prefetch(&self) -> &PrefetchOrchestrator {
        &self.prefetch
    }

    /// Mount a query for `request` through the shared cache at the query
    /// tier TTL. Uses the client's channel unless `options` names one.
    pub fn query<T>(&self, request: HttpRequest, options: QueryOptions<T>) -> SyncedQuery<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let options = if options.channel.is_some() {
            options
        } else {
            options.channel(Arc::clone(&self.channel))
        };
        let fetcher = CachedFetch::with_query_ttl(self.cache.clone(), request);
        SyncedQuery::mount(fetcher.cache_key(), Arc::new(fetcher), options)
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("cache", &self.cache)
            .field("channel", &self.channel)
            .field("prefetch", &self.prefetch)
            .finish()
    }
}
