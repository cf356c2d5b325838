//! SyncedQuery against a scripted backend and an in-memory realtime link.

use consult_sync::{CachedFetch, QueryOptions, SyncedQuery};
use consult_test_utils::{
    eventually, fast_reconnect, memory_channel, test_cache, wait_for_state, ConnectionState,
    HttpRequest, KeyedRequestCache, MemoryConnector, MockResponse, MockTransport,
    RealtimeChannel,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const BOOKINGS: &str = "/api/bookings/user/42";

fn mount_bookings(
    cache: &KeyedRequestCache,
    options: QueryOptions<Value>,
) -> SyncedQuery<Value> {
    let fetcher = CachedFetch::with_query_ttl(cache.clone(), HttpRequest::get(BOOKINGS));
    SyncedQuery::mount(fetcher.cache_key(), Arc::new(fetcher), options)
}

async fn settled(query: &SyncedQuery<Value>) {
    let mut changes = query.watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        changes.wait_for(|state| !state.is_loading),
    )
    .await
    .expect("query never settled")
    .expect("query state closed");
}

#[tokio::test(start_paused = true)]
async fn mount_loads_data() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([{"id": 1}])));
    let cache = test_cache(&transport);

    let query = mount_bookings(&cache, QueryOptions::new());
    assert!(query.is_loading());
    settled(&query).await;

    let state = query.state();
    assert_eq!(state.data, Some(json!([{"id": 1}])));
    assert_eq!(state.error, None);
    assert_eq!(transport.calls_to(BOOKINGS), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_query_never_fetches_or_subscribes() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([])));
    let cache = test_cache(&transport);
    let (channel, _connector) = memory_channel();
    assert!(wait_for_state(&channel, ConnectionState::Connected).await);

    let query = mount_bookings(
        &cache,
        QueryOptions::new()
            .enabled(false)
            .topic("booking_update")
            .channel(Arc::clone(&channel)),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(transport.total_calls(), 0);
    assert_eq!(query.data(), None);
    assert!(!query.is_loading());
    assert!(!query.is_subscribed());
    assert_eq!(channel.listener_count("booking_update"), 0);

    assert_eq!(query.refetch().await.data, None);
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn enabling_fetches_and_subscribes() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([{"id": 2}])));
    let cache = test_cache(&transport);
    let (channel, _connector) = memory_channel();
    assert!(wait_for_state(&channel, ConnectionState::Connected).await);

    let query = mount_bookings(
        &cache,
        QueryOptions::new()
            .enabled(false)
            .topic("booking_update")
            .channel(Arc::clone(&channel)),
    );
    query.set_enabled(true);
    settled(&query).await;

    assert_eq!(query.data(), Some(json!([{"id": 2}])));
    assert!(query.is_subscribed());
    assert_eq!(channel.listener_count("booking_update"), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_refetches_make_one_network_call() {
    let transport = MockTransport::new();
    transport.respond(
        BOOKINGS,
        MockResponse::ok(json!({"version": 1})).after(Duration::from_millis(100)),
    );
    let cache = test_cache(&transport);
    let query = mount_bookings(&cache, QueryOptions::new());
    settled(&query).await;
    assert_eq!(transport.calls_to(BOOKINGS), 1);

    let (a, b, c) = tokio::join!(query.refetch(), query.refetch(), query.refetch());

    assert_eq!(transport.calls_to(BOOKINGS), 2);
    assert_eq!(a.data, Some(json!({"version": 1})));
    assert_eq!(b.data, a.data);
    assert_eq!(c.data, a.data);
    assert!(!query.is_loading());
}

#[tokio::test(start_paused = true)]
async fn topic_event_triggers_refetch() {
    let transport = MockTransport::new();
    transport
        .enqueue(BOOKINGS, MockResponse::ok(json!([{"id": 1, "status": "pending"}])))
        .respond(BOOKINGS, MockResponse::ok(json!([{"id": 1, "status": "confirmed"}])));
    let cache = test_cache(&transport);
    let (channel, connector) = memory_channel();
    assert!(wait_for_state(&channel, ConnectionState::Connected).await);

    let query = mount_bookings(
        &cache,
        QueryOptions::new()
            .topic("booking_update")
            .channel(Arc::clone(&channel)),
    );
    settled(&query).await;
    assert_eq!(query.data(), Some(json!([{"id": 1, "status": "pending"}])));
    assert_eq!(channel.listener_count("booking_update"), 1);

    assert!(connector.push("booking_update", json!({"id": 1})));

    assert!(
        eventually(|| query.data() == Some(json!([{"id": 1, "status": "confirmed"}]))).await
    );
    assert_eq!(transport.calls_to(BOOKINGS), 2);
}

#[tokio::test(start_paused = true)]
async fn events_on_other_topics_are_ignored() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([])));
    let cache = test_cache(&transport);
    let (channel, connector) = memory_channel();
    assert!(wait_for_state(&channel, ConnectionState::Connected).await);

    let query = mount_bookings(
        &cache,
        QueryOptions::new()
            .topic("booking_update")
            .channel(Arc::clone(&channel)),
    );
    settled(&query).await;

    connector.push("grade_posted", json!({"course": "CS101"}));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.calls_to(BOOKINGS), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribes_once_channel_connects() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([])));
    let cache = test_cache(&transport);

    let connector = MemoryConnector::new();
    connector.set_refuse(true);
    let channel = Arc::new(RealtimeChannel::new(connector.clone(), fast_reconnect()));
    channel.start();
    assert!(wait_for_state(&channel, ConnectionState::Disconnected).await);

    let query = mount_bookings(
        &cache,
        QueryOptions::new()
            .topic("booking_update")
            .channel(Arc::clone(&channel)),
    );
    settled(&query).await;
    assert!(!query.is_subscribed());

    connector.set_refuse(false);
    assert!(eventually(|| query.is_subscribed()).await);
    assert_eq!(channel.listener_count("booking_update"), 1);
}

#[tokio::test(start_paused = true)]
async fn fetch_error_is_stored_and_cleared_on_success() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::status(500, "database unavailable"));
    let cache = test_cache(&transport);

    let query = mount_bookings(&cache, QueryOptions::new());
    settled(&query).await;
    let error = query.error().expect("error stored");
    assert_eq!(error.status(), Some(500));
    assert_eq!(query.data(), None);

    transport.respond(BOOKINGS, MockResponse::ok(json!([{"id": 3}])));
    let state = query.refetch().await;
    assert_eq!(state.error, None);
    assert_eq!(state.data, Some(json!([{"id": 3}])));
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_keeps_previous_data() {
    let transport = MockTransport::new();
    transport
        .enqueue(BOOKINGS, MockResponse::ok(json!([{"id": 4}])))
        .respond(BOOKINGS, MockResponse::transport_error("connection reset"));
    let cache = test_cache(&transport);

    let query = mount_bookings(&cache, QueryOptions::new());
    settled(&query).await;

    let state = query.refetch().await;
    assert_eq!(state.data, Some(json!([{"id": 4}])));
    assert!(state.error.is_some_and(|err| err.is_network()));
}

#[tokio::test(start_paused = true)]
async fn dependency_change_refetches() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([])));
    let cache = test_cache(&transport);

    let query = mount_bookings(&cache, QueryOptions::new().dependencies(vec![json!("fall")]));
    settled(&query).await;

    query.set_dependencies(vec![json!("fall")]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.calls_to(BOOKINGS), 1);

    query.set_dependencies(vec![json!("spring")]);
    assert!(eventually(|| transport.calls_to(BOOKINGS) == 2).await);
}

#[tokio::test(start_paused = true)]
async fn drop_and_disable_detach_only_their_own_listener() {
    let transport = MockTransport::new();
    transport.respond(BOOKINGS, MockResponse::ok(json!([])));
    let cache = test_cache(&transport);
    let (channel, _connector) = memory_channel();
    assert!(wait_for_state(&channel, ConnectionState::Connected).await);

    let options = || {
        QueryOptions::new()
            .topic("booking_update")
            .channel(Arc::clone(&channel))
    };
    let first = mount_bookings(&cache, options());
    let second = mount_bookings(&cache, options());
    let third = mount_bookings(&cache, options());
    assert_eq!(channel.listener_count("booking_update"), 3);

    drop(first);
    assert_eq!(channel.listener_count("booking_update"), 2);

    second.set_enabled(false);
    assert_eq!(channel.listener_count("booking_update"), 1);
    assert!(third.is_subscribed());

    third.set_topic(Some("booking_cancelled".to_string()));
    assert_eq!(channel.listener_count("booking_update"), 0);
    assert_eq!(channel.listener_count("booking_cancelled"), 1);

    third.set_topic(None);
    assert!(channel.topics().is_empty());
}
