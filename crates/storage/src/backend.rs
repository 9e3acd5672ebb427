//! Backing store trait definition.
//!
//! This module defines the [`BackingStore`] trait: the durable key-value store
//! plus publish/subscribe transport that holds tenant configuration. It is the
//! single source of truth shared by every gateway process.
//!
//! # Design Philosophy
//!
//! The trait is deliberately small:
//! - **Values are bytes**: record encoding lives in [`crate::record`], not in the store
//! - **Sets of strings**: realm profile membership is a plain set of profile ids
//! - **Typed notifications**: subscribers receive decoded [`RefreshMessage`]s
//! - **Async by default**: every operation may cross the network
//!
//! Consistency is "eventually visible to other processes via invalidation";
//! callers must not assume read-your-writes across processes.
//!
//! See [`MemoryBackingStore`](crate::MemoryBackingStore) for a reference
//! implementation.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{error::StorageResult, message::RefreshMessage};

/// Receiving half of a refresh-channel subscription.
///
/// The channel yields `None` once the transport closes the subscription.
pub type Subscription = mpsc::Receiver<RefreshMessage>;

/// Durable key-value store with set membership and pub/sub.
///
/// # Key Operations
///
/// | Method | Used by |
/// |--------|---------|
/// | [`get`](BackingStore::get) | resolver (config record fetch) |
/// | [`set_members`](BackingStore::set_members) | resolver (authorization set fetch) |
/// | [`subscribe`](BackingStore::subscribe) | invalidation listener |
/// | [`set`](BackingStore::set), [`delete`](BackingStore::delete) | administrative actor |
/// | [`add_members`](BackingStore::add_members), [`remove_members`](BackingStore::remove_members) | administrative actor |
/// | [`publish`](BackingStore::publish) | administrative actor |
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist
    /// - `Err(...)` on transport errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Stores a value, overwriting any previous value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Removes a key. Removing a missing key is not an error.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Returns every member of the set stored at `key`.
    ///
    /// A missing set is returned as an empty vector.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_members(&self, key: &str) -> StorageResult<Vec<String>>;

    /// Adds members to the set stored at `key`, creating it if needed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn add_members(&self, key: &str, members: &[String]) -> StorageResult<()>;

    /// Removes members from the set stored at `key`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn remove_members(&self, key: &str, members: &[String]) -> StorageResult<()>;

    /// Publishes a message on `channel`.
    ///
    /// Returns the number of subscribers the message was delivered to.
    /// Delivery is best-effort; a slow subscriber may miss messages.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn publish(&self, channel: &str, message: RefreshMessage) -> StorageResult<usize>;

    /// Subscribes to `channel`.
    ///
    /// Messages published after this call returns are delivered in publish
    /// order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn subscribe(&self, channel: &str) -> StorageResult<Subscription>;
}
