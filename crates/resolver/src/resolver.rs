//! The resolution entry point.
//!
//! [`ConfigResolver::resolve`] is the whole surface the execution pipeline
//! sees:
//!
//! ```text
//! resolve(identity)
//!   → AuthorizationIndex: profile ∈ realm set?   ── no ──► NotAuthorized (no secret read)
//!   → StampedeGuard(config:{provider}:{realm}:{profile})
//!        hit  ──────────────────────────────────────────► cached ConfigRecord
//!        miss → BackingStore::get → decode → decrypt ──► cached ConfigRecord
//!             → absent ─────────────────────────────────► NotFound (cached negatively)
//! ```
//!
//! The cache only ever holds decrypted records; the ciphertext never leaves
//! the loader.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use paygate_resolver::{ConfigResolver, ResolverConfig};
//! use paygate_storage::{
//!     AesGcmSecretCodec, BackingStore, ConfigRecord, MemoryBackingStore, SecretString,
//!     StoredConfigRecord, TenantIdentity,
//!     keys::{stored_config_key, stored_profiles_key},
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryBackingStore::new());
//! let codec = Arc::new(AesGcmSecretCodec::new(&[0x42; 32])?);
//! let tenant = TenantIdentity::parse("Alipay", "2088001", "2021000001")?;
//!
//! // Administrative side: authorize the profile and store its record.
//! store
//!     .add_members(
//!         &stored_profiles_key(tenant.provider(), tenant.realm_id()),
//!         &[tenant.profile_id().to_string()],
//!     )
//!     .await?;
//! let record = ConfigRecord {
//!     provider: tenant.provider().clone(),
//!     profile_id: tenant.profile_id().clone(),
//!     gateway_endpoint: "https://openapi.alipay.com/gateway.do".to_owned(),
//!     secret: SecretString::new("signing-key".to_owned()),
//! };
//! let stored = StoredConfigRecord::seal(&record, codec.as_ref())?;
//! store.set(&stored_config_key(&tenant), stored.encode()?).await?;
//!
//! // Request side.
//! let resolver = ConfigResolver::new(store, codec, ResolverConfig::default());
//! let resolved = resolver.resolve(&tenant).await?;
//! assert_eq!(resolved.secret.expose(), "signing-key");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use fail::fail_point;
use paygate_storage::{
    BackingStore, ConfigRecord, SecretCodec, StorageError, StoredConfigRecord, TenantIdentity,
    keys::{config_key, stored_config_key},
};
use tokio_util::sync::CancellationToken;

use crate::{
    authz::AuthorizationIndex,
    config::ResolverConfig,
    error::{ResolveError, Result},
    listener::{InvalidationListener, InvalidationTargets},
    local_cache::LocalCache,
    metrics::{CacheMetrics, ResolverMetricsSnapshot},
    stampede::{Loaded, StampedeGuard},
};

/// Resolves tenant identities to decrypted configuration records.
///
/// Construct one per process and share it by reference or [`Arc`]; it owns
/// both caches.
pub struct ConfigResolver {
    store: Arc<dyn BackingStore>,
    codec: Arc<dyn SecretCodec>,
    authz: AuthorizationIndex,
    guard: StampedeGuard<Arc<ConfigRecord>>,
    config: ResolverConfig,
}

impl ConfigResolver {
    /// Creates a resolver with empty caches.
    #[must_use]
    pub fn new(
        store: Arc<dyn BackingStore>,
        codec: Arc<dyn SecretCodec>,
        config: ResolverConfig,
    ) -> Self {
        let authz = AuthorizationIndex::new(Arc::clone(&store), &config);
        let guard = StampedeGuard::new(
            Arc::new(LocalCache::new("config")),
            config.negative_ttl(),
            Arc::new(CacheMetrics::new()),
        );
        Self { store, codec, authz, guard, config }
    }

    /// Resolves `identity` to its decrypted configuration.
    ///
    /// Authorization is checked first; a profile outside its realm's set
    /// never causes a read of the secret record.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::NotAuthorized`] if the profile is not in its realm's authorized set
    /// - [`ResolveError::NotFound`] if no record exists, or the stored record cannot be decoded or decrypted
    /// - [`ResolveError::ColdStartTimeout`] if either lookup exceeds its bound
    /// - [`ResolveError::BackingStoreUnavailable`] on transport failure
    #[tracing::instrument(skip(self, identity), fields(tenant = %identity))]
    pub async fn resolve(&self, identity: &TenantIdentity) -> Result<Arc<ConfigRecord>> {
        if !self.authz.check(identity).await? {
            tracing::debug!("profile not in realm's authorized set");
            return Err(ResolveError::NotAuthorized);
        }

        let key = config_key(identity);
        let loaded = self
            .guard
            .with_exclusive_load(&key, self.config.config_timeout(), || self.load(identity))
            .await?;
        loaded.ok_or(ResolveError::NotFound)
    }

    /// Like [`resolve`](Self::resolve), but gives up as soon as `token` is
    /// cancelled.
    ///
    /// A cancelled resolution releases its lock and writes nothing to the
    /// cache.
    ///
    /// # Errors
    ///
    /// [`ResolveError::Cancelled`] on cancellation, otherwise as
    /// [`resolve`](Self::resolve).
    pub async fn resolve_with_cancellation(
        &self,
        identity: &TenantIdentity,
        token: &CancellationToken,
    ) -> Result<Arc<ConfigRecord>> {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(tenant = %identity, "resolution cancelled");
                Err(ResolveError::Cancelled)
            },
            result = self.resolve(identity) => result,
        }
    }

    async fn load(&self, identity: &TenantIdentity) -> Result<Loaded<Arc<ConfigRecord>>> {
        fail_point!("config-before-load", |_| {
            Err(ResolveError::from(StorageError::connection("injected failure before config load")))
        });

        let Some(bytes) = self.store.get(&stored_config_key(identity)).await? else {
            tracing::debug!("no stored configuration record");
            return Ok(Loaded::Missing);
        };

        let stored = StoredConfigRecord::decode(&bytes).map_err(|err| {
            tracing::warn!(error = %err, "stored configuration record is malformed");
            ResolveError::NotFound
        })?;
        if stored.provider != *identity.provider() || stored.profile_id != *identity.profile_id() {
            tracing::warn!(
                stored_provider = %stored.provider,
                stored_profile = %stored.profile_id,
                "stored configuration record belongs to a different tenant"
            );
            return Err(ResolveError::NotFound);
        }

        let record = stored.open(self.codec.as_ref()).map_err(|err| {
            tracing::warn!(error = %err, "failed to decrypt stored secret");
            ResolveError::NotFound
        })?;
        Ok(Loaded::Found(Arc::new(record), self.config.config_ttl()))
    }

    /// Returns the authorization index.
    #[must_use]
    pub fn authorization(&self) -> &AuthorizationIndex {
        &self.authz
    }

    /// Returns the configuration-record cache.
    #[must_use]
    pub fn config_cache(&self) -> &Arc<LocalCache<Arc<ConfigRecord>>> {
        self.guard.cache()
    }

    /// Returns the resolver's configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Returns counters for both caches.
    #[must_use]
    pub fn metrics(&self) -> ResolverMetricsSnapshot {
        ResolverMetricsSnapshot {
            config: self.guard.metrics().snapshot(),
            authz: self.authz.metrics(),
        }
    }

    /// Returns handles to both caches for applying refresh messages.
    #[must_use]
    pub fn invalidation_targets(&self) -> InvalidationTargets {
        InvalidationTargets {
            config: Arc::clone(self.guard.cache()),
            config_metrics: Arc::clone(self.guard.metrics()),
            authz: Arc::clone(self.authz.cache()),
            authz_metrics: Arc::clone(self.authz.metrics_handle()),
        }
    }

    /// Starts this process's invalidation listener on the configured refresh
    /// channel.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn spawn_listener(&self) -> InvalidationListener {
        InvalidationListener::spawn(
            Arc::clone(&self.store),
            self.config.refresh_channel(),
            self.invalidation_targets(),
            self.config.resubscribe_backoff(),
        )
    }

    /// Runs pending cache maintenance so entry counts are exact.
    pub async fn sync(&self) {
        self.guard.cache().sync().await;
        self.authz.cache().sync().await;
    }
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("authz", &self.authz)
            .field("config", &self.guard)
            .finish_non_exhaustive()
    }
}
