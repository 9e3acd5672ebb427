//! End-to-end resolution behavior against an instrumented in-memory store.
//!
//! Each test counts backing-store reads per key to verify caching, stampede
//! protection, authorization ordering, and invalidation.

#![allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use paygate_resolver::{ConfigResolver, InvalidationListener, ResolveError, ResolverConfig, TtlPolicy};
use paygate_storage::{
    BackingStore, MemoryBackingStore, ProviderName, RealmId, RefreshMessage, TenantIdentity,
    keys::{config_key, realm_scope, stored_config_key, stored_profiles_key},
    testutil::{
        InstrumentedStore, authorize, identity, seed_authorized_tenant, seed_tenant, test_codec,
    },
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolver_with(store: &InstrumentedStore, config: ResolverConfig) -> Arc<ConfigResolver> {
    Arc::new(ConfigResolver::new(Arc::new(store.clone()), test_codec(), config))
}

fn resolver(store: &InstrumentedStore) -> Arc<ConfigResolver> {
    resolver_with(store, ResolverConfig::default())
}

fn profiles_key(realm: &str) -> String {
    stored_profiles_key(&ProviderName::new("alipay").expect("provider"), &RealmId::new(realm).expect("realm"))
}

fn realm(name: &str) -> (ProviderName, RealmId) {
    (ProviderName::new("Alipay").expect("provider"), RealmId::new(name).expect("realm"))
}

async fn seed(store: &InstrumentedStore, tenant: &TenantIdentity, secret: &str) {
    seed_authorized_tenant(store, test_codec().as_ref(), tenant, secret).await;
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn start_listener(resolver: &ConfigResolver, store: &MemoryBackingStore) -> InvalidationListener {
    let listener = resolver.spawn_listener();
    let channel = resolver.config().refresh_channel().to_owned();
    let expected = store.subscriber_count(&channel) + 1;
    wait_until(|| store.subscriber_count(&channel) >= expected).await;
    listener
}

async fn publish(store: &InstrumentedStore, message: RefreshMessage) {
    let config = ResolverConfig::default();
    store.publish(config.refresh_channel(), message).await.expect("publish refresh message");
}

// ---------------------------------------------------------------------------
// Stampede protection
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_concurrent_cold_resolves_load_once() {
    let store = InstrumentedStore::new();
    let tenant = identity("alipay", "R1", "P1");
    seed(&store, &tenant, "secret").await;
    // Keep loads in flight long enough for every caller to miss.
    store.delay_reads("tenant-", Duration::from_millis(50));
    let resolver = resolver(&store);

    let mut handles = Vec::with_capacity(100);
    for _ in 0..100 {
        let resolver = Arc::clone(&resolver);
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move { resolver.resolve(&tenant).await }));
    }
    for handle in handles {
        let record = handle.await.expect("task").expect("resolve");
        assert_eq!(record.secret.expose(), "secret");
    }

    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 1);
    assert_eq!(store.reads_of(&profiles_key("R1")), 1);
    assert_eq!(resolver.metrics().config.loads, 1);
    assert_eq!(resolver.metrics().authz.loads, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn cold_load_survives_evictions_of_other_tenants() {
    let store = InstrumentedStore::new();
    let tenant = identity("alipay", "R1", "P1");
    seed(&store, &tenant, "secret").await;
    store.delay_reads("tenant-", Duration::from_millis(50));
    let resolver = resolver(&store);

    // Unrelated invalidations keep arriving while the cold load is in flight.
    let churn = {
        let resolver = Arc::clone(&resolver);
        let other = config_key(&identity("alipay", "R9", "P9"));
        let (provider, realm_id) = realm("R9");
        let scope = realm_scope(&provider, &realm_id);
        tokio::spawn(async move {
            loop {
                resolver.config_cache().evict(&other).await;
                resolver.authorization().cache().evict_scope(&scope).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut handles = Vec::with_capacity(100);
    for _ in 0..100 {
        let resolver = Arc::clone(&resolver);
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move { resolver.resolve(&tenant).await }));
    }
    for handle in handles {
        let record = handle.await.expect("task").expect("resolve");
        assert_eq!(record.secret.expose(), "secret");
    }
    churn.abort();

    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 1);
    assert_eq!(store.reads_of(&profiles_key("R1")), 1);
    assert_eq!(resolver.metrics().config.discarded_loads, 0);
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sliding_window_renewed_by_continuous_access() {
    let store = InstrumentedStore::new();
    let tenant = identity("alipay", "R1", "P1");
    seed(&store, &tenant, "secret").await;
    let config = ResolverConfig::builder()
        .config_ttl(TtlPolicy::new(Duration::from_millis(300), Duration::from_secs(10)).unwrap())
        .build()
        .unwrap();
    let resolver = resolver_with(&store, config);

    // Access every 100ms for three sliding windows.
    for _ in 0..10 {
        resolver.resolve(&tenant).await.expect("resolve");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 1);

    // Idle past the window: the entry lapses.
    tokio::time::sleep(Duration::from_millis(450)).await;
    resolver.resolve(&tenant).await.expect("resolve");
    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 2);
}

#[tokio::test]
async fn absolute_cap_reached_despite_continuous_access() {
    let store = InstrumentedStore::new();
    let tenant = identity("alipay", "R1", "P1");
    seed(&store, &tenant, "secret").await;
    let config = ResolverConfig::builder()
        .config_ttl(TtlPolicy::new(Duration::from_millis(300), Duration::from_millis(600)).unwrap())
        .build()
        .unwrap();
    let resolver = resolver_with(&store, config);

    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(1_000) {
        resolver.resolve(&tenant).await.expect("resolve");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // One load at start, one after the cap at ~600ms.
    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 2);
}

// ---------------------------------------------------------------------------
// Negative caching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_record_loaded_once_per_negative_window() {
    let store = InstrumentedStore::new();
    let tenant = identity("alipay", "R1", "P1");
    authorize(&store, "alipay", "R1", &["P1"]).await;
    let config =
        ResolverConfig::builder().negative_ttl(Duration::from_millis(300)).build().unwrap();
    let resolver = resolver_with(&store, config);

    for _ in 0..10 {
        assert!(matches!(resolver.resolve(&tenant).await, Err(ResolveError::NotFound)));
    }
    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    seed_tenant(&store, test_codec().as_ref(), &tenant, "late").await;
    assert_eq!(resolver.resolve(&tenant).await.expect("resolve").secret.expose(), "late");
    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 2);
}

// ---------------------------------------------------------------------------
// Authorization before secret
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unauthorized_profiles_never_read_secret_storage() {
    let store = InstrumentedStore::new();
    let member = identity("alipay", "R1", "P1");
    let outsider = identity("alipay", "R1", "P9");
    let other_realm = identity("alipay", "R2", "P1");
    seed(&store, &member, "secret").await;
    // Records exist for both identities; only membership keeps them out.
    seed_tenant(&store, test_codec().as_ref(), &outsider, "outsider").await;
    seed_tenant(&store, test_codec().as_ref(), &other_realm, "other").await;
    let resolver = resolver(&store);

    for denied in [&outsider, &other_realm] {
        let err = resolver.resolve(denied).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotAuthorized));
        assert_eq!(store.reads_of(&stored_config_key(denied)), 0);
    }

    let denied = resolver.resolve(&outsider).await.unwrap_err().to_string();
    let missing = ResolveError::NotFound.to_string();
    assert_eq!(denied, missing, "denials must not reveal their cause");
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn config_change_evicts_only_named_profile() {
    let store = InstrumentedStore::new();
    let p1 = identity("alipay", "R1", "P1");
    let p2 = identity("alipay", "R1", "P2");
    seed(&store, &p1, "p1-v1").await;
    seed(&store, &p2, "p2-v1").await;
    let resolver = resolver(&store);
    let listener = start_listener(&resolver, store.inner()).await;

    resolver.resolve(&p1).await.expect("resolve p1");
    resolver.resolve(&p2).await.expect("resolve p2");
    store.reset_reads();

    seed_tenant(&store, test_codec().as_ref(), &p1, "p1-v2").await;
    publish(&store, RefreshMessage::config_change(&p1)).await;
    wait_until(|| listener.processed() == 1).await;

    assert_eq!(resolver.resolve(&p2).await.expect("resolve p2").secret.expose(), "p2-v1");
    assert_eq!(store.total_reads(), 0);

    assert_eq!(resolver.resolve(&p1).await.expect("resolve p1").secret.expose(), "p1-v2");
    assert_eq!(store.reads_of(&stored_config_key(&p1)), 1);
    assert_eq!(store.reads_of(&profiles_key("R1")), 0, "authz entry must survive");

    listener.shutdown().await;
}

#[tokio::test]
async fn mapping_change_revokes_removed_profile() {
    let store = InstrumentedStore::new();
    let p1 = identity("alipay", "R1", "P1");
    seed(&store, &p1, "secret").await;
    let resolver = resolver(&store);
    let listener = start_listener(&resolver, store.inner()).await;

    resolver.resolve(&p1).await.expect("resolve");

    store.remove_members(&profiles_key("R1"), &["P1".to_owned()]).await.expect("remove member");
    let (provider, realm_id) = realm("R1");
    publish(&store, RefreshMessage::mapping_change(provider, realm_id)).await;
    wait_until(|| listener.processed() == 1).await;

    assert!(matches!(resolver.resolve(&p1).await, Err(ResolveError::NotAuthorized)));
    listener.shutdown().await;
}

#[tokio::test]
async fn full_refresh_evicts_whole_realm_only() {
    let store = InstrumentedStore::new();
    let r1p1 = identity("alipay", "R1", "P1");
    let r1p2 = identity("alipay", "R1", "P2");
    let r2p1 = identity("alipay", "R2", "P1");
    for tenant in [&r1p1, &r1p2, &r2p1] {
        seed(&store, tenant, "secret").await;
    }
    let resolver = resolver(&store);
    let listener = start_listener(&resolver, store.inner()).await;

    for tenant in [&r1p1, &r1p2, &r2p1] {
        resolver.resolve(tenant).await.expect("warm");
    }
    store.reset_reads();

    let (provider, realm_id) = realm("R1");
    publish(&store, RefreshMessage::full_refresh(provider, realm_id)).await;
    wait_until(|| listener.processed() == 1).await;

    for tenant in [&r1p1, &r1p2, &r2p1] {
        resolver.resolve(tenant).await.expect("resolve");
    }
    assert_eq!(store.reads_of(&profiles_key("R1")), 1);
    assert_eq!(store.reads_of(&stored_config_key(&r1p1)), 1);
    assert_eq!(store.reads_of(&stored_config_key(&r1p2)), 1);
    assert_eq!(store.reads_of(&profiles_key("R2")), 0);
    assert_eq!(store.reads_of(&stored_config_key(&r2p1)), 0);

    listener.shutdown().await;
}

#[tokio::test]
async fn processes_sharing_a_store_converge_after_rotation() {
    let shared = MemoryBackingStore::new();
    let store_a = InstrumentedStore::wrap(shared.clone());
    let store_b = InstrumentedStore::wrap(shared.clone());
    let tenant = identity("alipay", "R1", "P1");
    seed(&store_a, &tenant, "v1").await;

    let resolver_a = resolver(&store_a);
    let resolver_b = resolver(&store_b);
    let listener_a = start_listener(&resolver_a, &shared).await;
    let listener_b = start_listener(&resolver_b, &shared).await;

    assert_eq!(resolver_a.resolve(&tenant).await.expect("a").secret.expose(), "v1");
    assert_eq!(resolver_b.resolve(&tenant).await.expect("b").secret.expose(), "v1");

    seed_tenant(&store_a, test_codec().as_ref(), &tenant, "v2").await;
    publish(&store_a, RefreshMessage::config_change(&tenant)).await;
    wait_until(|| listener_a.processed() == 1 && listener_b.processed() == 1).await;

    assert_eq!(resolver_a.resolve(&tenant).await.expect("a").secret.expose(), "v2");
    assert_eq!(resolver_b.resolve(&tenant).await.expect("b").secret.expose(), "v2");

    listener_a.shutdown().await;
    listener_b.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cold-start isolation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_new_tenant_times_out_without_affecting_cached_tenant() {
    let store = InstrumentedStore::new();
    let warm = identity("alipay", "WARM", "P1");
    let cold = identity("alipay", "NEW", "P1");
    seed(&store, &warm, "warm").await;
    seed(&store, &cold, "cold").await;
    store.delay_reads(stored_config_key(&cold), Duration::from_secs(3));
    let config =
        ResolverConfig::builder().config_timeout(Duration::from_millis(200)).build().unwrap();
    let resolver = resolver_with(&store, config);
    resolver.resolve(&warm).await.expect("warm up");

    let slow = {
        let resolver = Arc::clone(&resolver);
        let cold = cold.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = resolver.resolve(&cold).await;
            (result, started.elapsed())
        })
    };

    // The cached tenant keeps resolving promptly while the cold load hangs.
    for _ in 0..20 {
        let started = Instant::now();
        assert_eq!(resolver.resolve(&warm).await.expect("warm").secret.expose(), "warm");
        assert!(started.elapsed() < Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (result, elapsed) = slow.await.expect("task");
    assert!(matches!(result, Err(ResolveError::ColdStartTimeout)));
    assert!(elapsed < Duration::from_millis(700), "timed out after {elapsed:?}");
    assert!(result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn slow_authorization_lookup_fails_closed_before_secret_read() {
    let store = InstrumentedStore::new();
    let tenant = identity("alipay", "NEW", "P1");
    seed(&store, &tenant, "secret").await;
    store.delay_reads(profiles_key("NEW"), Duration::from_secs(3));
    let config =
        ResolverConfig::builder().authz_timeout(Duration::from_millis(100)).build().unwrap();
    let resolver = resolver_with(&store, config);

    let started = Instant::now();
    let err = resolver.resolve(&tenant).await.unwrap_err();
    assert!(matches!(err, ResolveError::ColdStartTimeout));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(store.reads_of(&stored_config_key(&tenant)), 0);
}

// ---------------------------------------------------------------------------
// End-to-end scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn end_to_end_resolve_cache_and_rotate() {
    let store = InstrumentedStore::new();
    let p1 = identity("Alipay", "R1", "P1");
    let p2 = identity("Alipay", "R1", "P2");
    seed_tenant(&store, test_codec().as_ref(), &p1, "p1-secret").await;
    seed_tenant(&store, test_codec().as_ref(), &p2, "p2-secret").await;
    authorize(&store, "Alipay", "R1", &["P1", "P2"]).await;
    let resolver = resolver(&store);
    let listener = start_listener(&resolver, store.inner()).await;

    // Cold: one authorization load, one config load, decrypted result.
    let record = resolver.resolve(&p1).await.expect("first resolve");
    assert_eq!(record.secret.expose(), "p1-secret");
    assert_eq!(record.profile_id.as_str(), "P1");
    assert_eq!(store.reads_of(&profiles_key("R1")), 1);
    assert_eq!(store.reads_of(&stored_config_key(&p1)), 1);

    // Warm: no backing-store calls.
    store.reset_reads();
    let again = resolver.resolve(&p1).await.expect("second resolve");
    assert!(Arc::ptr_eq(&record, &again));
    assert_eq!(store.total_reads(), 0);

    resolver.resolve(&p2).await.expect("warm p2");
    store.reset_reads();

    // Rotation: P1 reloads once, P2 stays cached.
    seed_tenant(&store, test_codec().as_ref(), &p1, "p1-rotated").await;
    publish(&store, RefreshMessage::config_change(&p1)).await;
    wait_until(|| listener.processed() == 1).await;

    assert_eq!(resolver.resolve(&p2).await.expect("p2").secret.expose(), "p2-secret");
    assert_eq!(store.total_reads(), 0);

    assert_eq!(resolver.resolve(&p1).await.expect("third resolve").secret.expose(), "p1-rotated");
    assert_eq!(store.reads_of(&stored_config_key(&p1)), 1);
    assert_eq!(store.total_reads(), 1);

    listener.shutdown().await;
}
