//! In-memory backing store implementation.
//!
//! This module provides [`MemoryBackingStore`], an in-memory implementation
//! of [`BackingStore`] suitable for testing and development.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Sets**: Membership sets are kept in a [`BTreeSet`] so listings are ordered
//! - **Pub/sub**: Each subscriber gets a bounded channel; publishing never blocks
//!
//! # Example
//!
//! ```
//! use paygate_storage::{BackingStore, MemoryBackingStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryBackingStore::new();
//!
//!     store.add_members("tenant-profiles:alipay:R1", &["P1".to_owned()]).await.unwrap();
//!     let members = store.set_members("tenant-profiles:alipay:R1").await.unwrap();
//!
//!     assert_eq!(members, vec!["P1".to_owned()]);
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - A subscriber whose buffer is full misses messages (logged at `warn`)

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    backend::{BackingStore, Subscription},
    error::StorageResult,
    message::RefreshMessage,
};

/// Default per-subscriber buffer size.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1_024;

/// In-memory backing store.
///
/// # Cloning
///
/// `MemoryBackingStore` is cheaply cloneable via [`Arc`]. All clones share
/// the same data and subscribers, so two resolvers built over clones of one
/// store behave like two gateway processes sharing one backing store.
#[derive(Clone)]
pub struct MemoryBackingStore {
    data: Arc<RwLock<HashMap<String, Bytes>>>,
    sets: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
    subscribers: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<RefreshMessage>>>>>,
    subscriber_buffer: usize,
}

impl MemoryBackingStore {
    /// Creates an empty store with the default subscriber buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_subscriber_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Creates an empty store whose subscribers buffer at most `buffer`
    /// undelivered messages.
    #[must_use]
    pub fn with_subscriber_buffer(buffer: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            sets: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            subscriber_buffer: buffer.max(1),
        }
    }

    /// Closes every subscription on `channel`.
    ///
    /// Subscribers observe the end of their stream, as they would when a
    /// network transport drops the connection.
    pub fn close_channel(&self, channel: &str) {
        self.subscribers.lock().remove(channel);
    }

    /// Returns the number of live subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .get(channel)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    #[tracing::instrument(skip(self), level = "trace")]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(skip(self, value), level = "trace")]
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key.to_owned(), Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>> {
        Ok(self.sets.read().get(key).map(|set| set.iter().cloned().collect()).unwrap_or_default())
    }

    async fn add_members(&self, key: &str, members: &[String]) -> StorageResult<()> {
        let mut sets = self.sets.write();
        sets.entry(key.to_owned()).or_default().extend(members.iter().cloned());
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> StorageResult<()> {
        let mut sets = self.sets.write();
        if let Some(set) = sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, message), fields(kind = ?message.kind), level = "trace")]
    async fn publish(&self, channel: &str, message: RefreshMessage) -> StorageResult<usize> {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(channel) else {
            return Ok(0);
        };

        let mut delivered = 0;
        senders.retain(|sender| match sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            },
            Err(TrySendError::Full(_)) => {
                tracing::warn!(channel, "subscriber buffer full, refresh message dropped");
                true
            },
            Err(TrySendError::Closed(_)) => false,
        });
        Ok(delivered)
    }

    #[tracing::instrument(skip(self), level = "trace")]
    async fn subscribe(&self, channel: &str) -> StorageResult<Subscription> {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        self.subscribers.lock().entry(channel.to_owned()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{ProviderName, RealmId};

    fn mapping_change(realm: &str) -> RefreshMessage {
        RefreshMessage::mapping_change(
            ProviderName::new("alipay").unwrap(),
            RealmId::new(realm).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = MemoryBackingStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryBackingStore::new();
        assert!(store.set_members("s").await.unwrap().is_empty());

        store.add_members("s", &["P2".to_owned(), "P1".to_owned()]).await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["P1", "P2"]);

        store.remove_members("s", &["P1".to_owned(), "P2".to_owned()]).await.unwrap();
        assert!(store.set_members("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_fans_out_in_order() {
        let store = MemoryBackingStore::new();
        let mut a = store.subscribe("refresh").await.unwrap();
        let mut b = store.subscribe("refresh").await.unwrap();

        assert_eq!(store.publish("refresh", mapping_change("R1")).await.unwrap(), 2);
        assert_eq!(store.publish("refresh", mapping_change("R2")).await.unwrap(), 2);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().realm_id.as_str(), "R1");
            assert_eq!(rx.recv().await.unwrap().realm_id.as_str(), "R2");
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let store = MemoryBackingStore::new();
        assert_eq!(store.publish("refresh", mapping_change("R1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_message() {
        let store = MemoryBackingStore::with_subscriber_buffer(1);
        let mut rx = store.subscribe("refresh").await.unwrap();

        assert_eq!(store.publish("refresh", mapping_change("R1")).await.unwrap(), 1);
        assert_eq!(store.publish("refresh", mapping_change("R2")).await.unwrap(), 0);

        assert_eq!(rx.recv().await.unwrap().realm_id.as_str(), "R1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let store = MemoryBackingStore::new();
        let rx = store.subscribe("refresh").await.unwrap();
        drop(rx);

        assert_eq!(store.publish("refresh", mapping_change("R1")).await.unwrap(), 0);
        assert_eq!(store.subscriber_count("refresh"), 0);
    }

    #[tokio::test]
    async fn test_close_channel_ends_stream() {
        let store = MemoryBackingStore::new();
        let mut rx = store.subscribe("refresh").await.unwrap();
        store.close_channel("refresh");
        assert!(rx.recv().await.is_none());
    }
}
