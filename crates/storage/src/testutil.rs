//! Shared test utilities for backing-store consumers.
//!
//! This module provides an instrumented store wrapper and tenant seeding
//! helpers. It is feature-gated behind `testutil` to prevent leaking into
//! production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! paygate-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use paygate_storage::testutil::{InstrumentedStore, seed_tenant, test_codec};
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    backend::{BackingStore, Subscription},
    codec::{AesGcmSecretCodec, SecretCodec, SecretString},
    error::{StorageError, StorageResult},
    keys::{stored_config_key, stored_profiles_key},
    memory::MemoryBackingStore,
    message::RefreshMessage,
    record::{ConfigRecord, StoredConfigRecord},
    types::{ProviderName, RealmId, TenantIdentity},
};

/// Fixed AES-256 key used by [`test_codec`].
pub const TEST_CODEC_KEY: [u8; 32] = [0x5a; 32];

/// Returns an AES-GCM codec keyed with [`TEST_CODEC_KEY`].
#[must_use]
pub fn test_codec() -> Arc<AesGcmSecretCodec> {
    Arc::new(AesGcmSecretCodec::new(&TEST_CODEC_KEY).expect("test key is 32 bytes"))
}

/// Parses a tenant identity, panicking on empty components.
#[must_use]
pub fn identity(provider: &str, realm: &str, profile: &str) -> TenantIdentity {
    TenantIdentity::parse(provider, realm, profile).expect("valid test identity")
}

/// Builds the decoded record [`seed_tenant`] stores for `identity`.
#[must_use]
pub fn expected_record(identity: &TenantIdentity, secret: &str) -> ConfigRecord {
    ConfigRecord {
        provider: identity.provider().clone(),
        profile_id: identity.profile_id().clone(),
        gateway_endpoint: format!("https://gateway.test/{}", identity.provider().canonical()),
        secret: SecretString::new(secret.to_owned()),
    }
}

/// Writes an encrypted configuration record for `identity`.
///
/// Does not touch the realm's profile set; see [`authorize`].
pub async fn seed_tenant(
    store: &dyn BackingStore,
    codec: &dyn SecretCodec,
    identity: &TenantIdentity,
    secret: &str,
) {
    let stored = StoredConfigRecord::seal(&expected_record(identity, secret), codec)
        .expect("seal test secret");
    store
        .set(&stored_config_key(identity), stored.encode().expect("encode test record"))
        .await
        .expect("seed config record");
}

/// Adds `profiles` to the authorized set of `(provider, realm)`.
pub async fn authorize(store: &dyn BackingStore, provider: &str, realm: &str, profiles: &[&str]) {
    let key = stored_profiles_key(
        &ProviderName::new(provider).expect("valid provider"),
        &RealmId::new(realm).expect("valid realm"),
    );
    let members: Vec<String> = profiles.iter().map(|p| (*p).to_owned()).collect();
    store.add_members(&key, &members).await.expect("seed profile set");
}

/// Seeds a record and authorizes its profile in one step.
pub async fn seed_authorized_tenant(
    store: &dyn BackingStore,
    codec: &dyn SecretCodec,
    identity: &TenantIdentity,
    secret: &str,
) {
    seed_tenant(store, codec, identity, secret).await;
    authorize(
        store,
        identity.provider().as_str(),
        identity.realm_id().as_str(),
        &[identity.profile_id().as_str()],
    )
    .await;
}

/// A [`MemoryBackingStore`] wrapper that counts reads per key and can inject
/// latency and failures.
///
/// Used to observe exactly how many backing-store calls the resolver makes.
#[derive(Clone, Default)]
pub struct InstrumentedStore {
    inner: MemoryBackingStore,
    reads: Arc<Mutex<HashMap<String, usize>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    failure: Arc<Mutex<Option<StorageError>>>,
}

impl InstrumentedStore {
    /// Creates an instrumented store over a fresh [`MemoryBackingStore`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an instrumented store sharing data with `inner`.
    #[must_use]
    pub fn wrap(inner: MemoryBackingStore) -> Self {
        Self { inner, ..Self::default() }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackingStore {
        &self.inner
    }

    /// Number of `get`/`set_members` calls issued for `key`.
    #[must_use]
    pub fn reads_of(&self, key: &str) -> usize {
        self.reads.lock().get(key).copied().unwrap_or(0)
    }

    /// Total number of `get`/`set_members` calls across all keys.
    #[must_use]
    pub fn total_reads(&self) -> usize {
        self.reads.lock().values().sum()
    }

    /// Resets all read counters.
    pub fn reset_reads(&self) {
        self.reads.lock().clear();
    }

    /// Delays every read of any key starting with `prefix` by `delay`.
    pub fn delay_reads(&self, prefix: impl Into<String>, delay: Duration) {
        self.delays.lock().insert(prefix.into(), delay);
    }

    /// Makes every subsequent read fail with `error`, or clears the failure.
    pub fn set_failure(&self, error: Option<StorageError>) {
        *self.failure.lock() = error;
    }

    async fn before_read(&self, key: &str) -> StorageResult<()> {
        *self.reads.lock().entry(key.to_owned()).or_default() += 1;
        let delay = self
            .delays
            .lock()
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay)
            .max();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for InstrumentedStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        self.before_read(key).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
        self.before_read(key).await?;
        self.inner.set_members(key).await
    }

    async fn add_members(&self, key: &str, members: &[String]) -> StorageResult<()> {
        self.inner.add_members(key, members).await
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> StorageResult<()> {
        self.inner.remove_members(key, members).await
    }

    async fn publish(&self, channel: &str, message: RefreshMessage) -> StorageResult<usize> {
        self.inner.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> StorageResult<Subscription> {
        self.inner.subscribe(channel).await
    }
}
