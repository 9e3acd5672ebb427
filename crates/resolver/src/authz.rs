//! Realm membership checks.
//!
//! [`AuthorizationIndex`] answers "is this profile allowed to use this
//! realm's credentials?" from a cached copy of the realm's authorized profile
//! set. It runs on its own [`LocalCache`] and [`StampedeGuard`] with a short
//! cold-start bound, so one new or misconfigured realm cannot tie up callers
//! resolving other realms.
//!
//! An empty set is cached as a positive entry with a short fixed TTL. That
//! separates "this realm authorizes nobody" (cached, answers `false`) from
//! "the lookup failed" (not cached, answers an error).

use std::{collections::HashSet, sync::Arc, time::Duration};

use fail::fail_point;
use paygate_storage::{
    BackingStore, ProfileId, ProviderName, RealmId, StorageError, TenantIdentity,
    keys::{authz_key, stored_profiles_key},
};

use crate::{
    config::{ResolverConfig, TtlPolicy},
    error::{ResolveError, Result},
    local_cache::LocalCache,
    metrics::{CacheMetrics, CacheMetricsSnapshot},
    stampede::{Loaded, StampedeGuard},
};

/// The authorized profiles of one realm.
pub type AuthorizationSet = Arc<HashSet<ProfileId>>;

/// Cached realm-to-profiles membership index.
pub struct AuthorizationIndex {
    store: Arc<dyn BackingStore>,
    guard: StampedeGuard<AuthorizationSet>,
    timeout: Duration,
    ttl: TtlPolicy,
    empty_ttl: TtlPolicy,
}

impl AuthorizationIndex {
    /// Creates an index reading membership sets from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, config: &ResolverConfig) -> Self {
        let guard = StampedeGuard::new(
            Arc::new(LocalCache::new("authz")),
            config.negative_ttl(),
            Arc::new(CacheMetrics::new()),
        );
        Self {
            store,
            guard,
            timeout: config.authz_timeout(),
            ttl: config.authz_ttl(),
            empty_ttl: config.empty_authz_policy(),
        }
    }

    /// Returns `true` only if `identity`'s profile is in its realm's set.
    ///
    /// Any lookup failure, including a cold-start timeout, answers `false`.
    pub async fn is_authorized(&self, identity: &TenantIdentity) -> bool {
        match self.check(identity).await {
            Ok(authorized) => authorized,
            Err(err) => {
                tracing::warn!(
                    tenant = %identity,
                    error = %err,
                    "authorization lookup failed, denying"
                );
                false
            },
        }
    }

    /// Checks membership, reporting why a lookup failed.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::ColdStartTimeout`] if the set could not be loaded within the authorization timeout
    /// - [`ResolveError::BackingStoreUnavailable`] on transport failure
    pub async fn check(&self, identity: &TenantIdentity) -> Result<bool> {
        let profiles = self.authorized_profiles(identity.provider(), identity.realm_id()).await?;
        Ok(profiles.contains(identity.profile_id()))
    }

    /// Returns the authorized profile set of `(provider, realm)`.
    ///
    /// # Errors
    ///
    /// Same as [`check`](Self::check).
    #[tracing::instrument(skip(self), fields(provider = %provider, realm = %realm))]
    pub async fn authorized_profiles(
        &self,
        provider: &ProviderName,
        realm: &RealmId,
    ) -> Result<AuthorizationSet> {
        let key = authz_key(provider, realm);
        let stored_key = stored_profiles_key(provider, realm);
        let store = Arc::clone(&self.store);
        let (ttl, empty_ttl) = (self.ttl, self.empty_ttl);

        let loaded = self
            .guard
            .with_exclusive_load(&key, self.timeout, || async move {
                fail_point!("authz-before-load", |_| {
                    Err(ResolveError::from(StorageError::connection(
                        "injected failure before authorization load",
                    )))
                });
                let members = store.set_members(&stored_key).await?;
                let profiles = parse_members(members);
                if profiles.is_empty() {
                    tracing::debug!("realm has no authorized profiles");
                    return Ok(Loaded::Found(Arc::new(profiles), empty_ttl));
                }
                Ok(Loaded::Found(Arc::new(profiles), ttl))
            })
            .await?;

        Ok(loaded.unwrap_or_default())
    }

    /// Returns the membership cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<LocalCache<AuthorizationSet>> {
        self.guard.cache()
    }

    pub(crate) fn metrics_handle(&self) -> &Arc<CacheMetrics> {
        self.guard.metrics()
    }

    /// Returns the membership cache's counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.guard.metrics().snapshot()
    }
}

fn parse_members(members: Vec<String>) -> HashSet<ProfileId> {
    members
        .into_iter()
        .filter_map(|member| match ProfileId::new(member) {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed profile set member");
                None
            },
        })
        .collect()
}

impl std::fmt::Debug for AuthorizationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationIndex")
            .field("guard", &self.guard)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
