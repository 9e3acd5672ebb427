//! Cross-process cache coherence.
//!
//! Every gateway process runs one [`InvalidationListener`]. It subscribes to
//! the refresh channel and turns each [`RefreshMessage`] into targeted
//! evictions:
//!
//! | Kind | Evicts |
//! |------|--------|
//! | [`RefreshKind::ConfigChange`] | the one `config:` entry named by the message |
//! | [`RefreshKind::MappingChange`] | the realm's `authz:` entry |
//! | [`RefreshKind::FullRefresh`] | the realm's `authz:` entry and every cached `config:` entry under it |
//!
//! Evictions are synchronous, so the receive loop never fans work out.
//! Processing is idempotent: applying a message twice evicts nothing the
//! second time. Lost messages are tolerated; entry TTLs bound staleness.
//!
//! If the subscription closes, the listener waits for the configured backoff
//! and subscribes again until [`shutdown`](InvalidationListener::shutdown) is
//! called.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use fail::fail_point;
use paygate_storage::{
    BackingStore, ConfigRecord, RefreshKind, RefreshMessage, StorageError,
    keys::{authz_key, config_key, realm_scope},
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{authz::AuthorizationSet, local_cache::LocalCache, metrics::CacheMetrics};

/// The caches a refresh message can evict from.
#[derive(Clone)]
pub struct InvalidationTargets {
    pub(crate) config: Arc<LocalCache<Arc<ConfigRecord>>>,
    pub(crate) config_metrics: Arc<CacheMetrics>,
    pub(crate) authz: Arc<LocalCache<AuthorizationSet>>,
    pub(crate) authz_metrics: Arc<CacheMetrics>,
}

impl InvalidationTargets {
    /// Applies one message.
    ///
    /// Returns the number of entries evicted, or `None` if the message was
    /// dropped as malformed (a `ConfigChange` that names no profile).
    pub async fn apply(&self, message: &RefreshMessage) -> Option<usize> {
        let evicted = match message.kind {
            RefreshKind::ConfigChange => {
                let Some(identity) = message.identity() else {
                    tracing::warn!(
                        provider = %message.provider,
                        realm = %message.realm_id,
                        "config change without profile id, dropping"
                    );
                    return None;
                };
                let key = config_key(&identity);
                let evicted = usize::from(self.config.evict(&key).await);
                self.config_metrics.record_evictions(evicted as u64);
                tracing::info!(
                    audit.action = "invalidate_config",
                    audit.resource = %key,
                    audit.result = "success",
                    audit.evicted = evicted,
                    "audit_event"
                );
                evicted
            },
            RefreshKind::MappingChange => self.evict_authz(message).await,
            RefreshKind::FullRefresh => {
                let authz = self.evict_authz(message).await;
                let scope = realm_scope(&message.provider, &message.realm_id);
                let configs = self.config.evict_scope(&scope).await;
                self.config_metrics.record_evictions(configs as u64);
                tracing::info!(
                    audit.action = "invalidate_realm",
                    audit.resource = %scope,
                    audit.result = "success",
                    audit.evicted = authz + configs,
                    "audit_event"
                );
                authz + configs
            },
        };
        Some(evicted)
    }

    async fn evict_authz(&self, message: &RefreshMessage) -> usize {
        let key = authz_key(&message.provider, &message.realm_id);
        let evicted = usize::from(self.authz.evict(&key).await);
        self.authz_metrics.record_evictions(evicted as u64);
        tracing::info!(
            audit.action = "invalidate_authorization",
            audit.resource = %key,
            audit.result = "success",
            audit.evicted = evicted,
            "audit_event"
        );
        evicted
    }
}

impl std::fmt::Debug for InvalidationTargets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationTargets")
            .field("config", &self.config)
            .field("authz", &self.authz)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct ListenerStats {
    processed: AtomicU64,
    dropped: AtomicU64,
    subscriptions: AtomicU64,
    last_error: Mutex<Option<StorageError>>,
}

impl ListenerStats {
    fn record_error(&self, channel: &str, err: StorageError) {
        tracing::warn!(channel, error = %err, "refresh subscription unavailable");
        *self.last_error.lock() = Some(err);
    }
}

/// Background task applying refresh messages to local caches.
///
/// Dropping the listener stops the task without waiting for it.
pub struct InvalidationListener {
    channel: String,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<ListenerStats>,
}

impl InvalidationListener {
    /// Subscribes to `channel` on `store` and starts applying messages to
    /// `targets`.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn BackingStore>,
        channel: impl Into<String>,
        targets: InvalidationTargets,
        resubscribe_backoff: Duration,
    ) -> Self {
        let channel = channel.into();
        let cancel_token = CancellationToken::new();
        let stats = Arc::new(ListenerStats::default());

        let handle = tokio::spawn(run(
            store,
            channel.clone(),
            targets,
            resubscribe_backoff,
            cancel_token.clone(),
            Arc::clone(&stats),
        ));

        Self { channel, cancel_token, handle: Mutex::new(Some(handle)), stats }
    }

    /// Returns the channel this listener consumes.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Messages applied so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.stats.processed.load(Ordering::Relaxed)
    }

    /// Messages dropped as malformed or by injected failure.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Successful subscriptions, including resubscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> u64 {
        self.stats.subscriptions.load(Ordering::Relaxed)
    }

    /// The most recent subscription failure, if any.
    ///
    /// A stream that ends without shutdown is reported as
    /// [`StorageError::Closed`].
    #[must_use]
    pub fn last_error(&self) -> Option<StorageError> {
        self.stats.last_error.lock().clone()
    }

    /// Returns `true` until the task has been shut down or has exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the task and waits for it to exit.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "invalidation listener task panicked");
        }
    }
}

impl Drop for InvalidationListener {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for InvalidationListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationListener")
            .field("channel", &self.channel)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

async fn run(
    store: Arc<dyn BackingStore>,
    channel: String,
    targets: InvalidationTargets,
    backoff: Duration,
    token: CancellationToken,
    stats: Arc<ListenerStats>,
) {
    'subscribe: loop {
        let subscription = tokio::select! {
            biased;
            () = token.cancelled() => break 'subscribe,
            subscription = store.subscribe(&channel) => subscription,
        };

        match subscription {
            Ok(mut rx) => {
                stats.subscriptions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(channel = %channel, "subscribed to refresh channel");
                loop {
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break 'subscribe,
                        message = rx.recv() => match message {
                            Some(message) => handle_message(&targets, &stats, &message).await,
                            None => {
                                stats.record_error(&channel, StorageError::closed(channel.as_str()));
                                break;
                            },
                        },
                    }
                }
            },
            Err(err) => stats.record_error(&channel, err),
        }

        tokio::select! {
            biased;
            () = token.cancelled() => break 'subscribe,
            () = tokio::time::sleep(backoff) => {},
        }
    }
    tracing::info!(channel = %channel, "invalidation listener shutting down");
}

async fn handle_message(
    targets: &InvalidationTargets,
    stats: &ListenerStats,
    message: &RefreshMessage,
) {
    match apply_message(targets, message).await {
        Some(evicted) => {
            stats.processed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = ?message.kind, evicted, "refresh message applied");
        },
        None => {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
        },
    }
}

async fn apply_message(targets: &InvalidationTargets, message: &RefreshMessage) -> Option<usize> {
    fail_point!("listener-before-apply", |_| {
        tracing::warn!(kind = ?message.kind, "injected failure, refresh message dropped");
        None
    });
    targets.apply(message).await
}
