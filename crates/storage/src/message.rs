//! Change notifications published by the administrative actor.
//!
//! After writing a configuration record or a realm's profile set to the
//! backing store, the administrator publishes a [`RefreshMessage`] on the
//! refresh channel. Every gateway process listens on that channel and evicts
//! the affected cache entries.
//!
//! Messages are JSON on the wire when a transport carries bytes:
//!
//! ```
//! use paygate_storage::{RefreshKind, RefreshMessage};
//!
//! let msg = RefreshMessage::decode(
//!     br#"{"kind":"config_change","provider":"alipay","realm_id":"R1","profile_id":"P1"}"#,
//! )
//! .unwrap();
//! assert_eq!(msg.kind, RefreshKind::ConfigChange);
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::{StorageError, StorageResult},
    types::{ProfileId, ProviderName, RealmId, TenantIdentity},
};

/// What changed in the backing store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// One profile's configuration record changed (e.g. secret rotation).
    ConfigChange,
    /// A realm's authorized profile set changed.
    MappingChange,
    /// Everything cached for a realm must be dropped.
    FullRefresh,
}

/// A change notification for one realm or one profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshMessage {
    /// What changed.
    pub kind: RefreshKind,
    /// Provider the change applies to.
    pub provider: ProviderName,
    /// Realm the change applies to.
    pub realm_id: RealmId,
    /// Profile the change applies to. Required for
    /// [`RefreshKind::ConfigChange`], ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,
}

impl RefreshMessage {
    /// A configuration change for a single tenant.
    #[must_use]
    pub fn config_change(identity: &TenantIdentity) -> Self {
        Self {
            kind: RefreshKind::ConfigChange,
            provider: identity.provider().clone(),
            realm_id: identity.realm_id().clone(),
            profile_id: Some(identity.profile_id().clone()),
        }
    }

    /// A membership change for a realm.
    #[must_use]
    pub fn mapping_change(provider: ProviderName, realm_id: RealmId) -> Self {
        Self { kind: RefreshKind::MappingChange, provider, realm_id, profile_id: None }
    }

    /// A full refresh of a realm.
    #[must_use]
    pub fn full_refresh(provider: ProviderName, realm_id: RealmId) -> Self {
        Self { kind: RefreshKind::FullRefresh, provider, realm_id, profile_id: None }
    }

    /// Returns the tenant identity a `ConfigChange` targets, if the message
    /// names a profile.
    #[must_use]
    pub fn identity(&self) -> Option<TenantIdentity> {
        self.profile_id.as_ref().map(|profile| {
            TenantIdentity::new(self.provider.clone(), self.realm_id.clone(), profile.clone())
        })
    }

    /// Serializes the message to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| StorageError::serialization_with_source("encode refresh message", e))
    }

    /// Parses a message from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] for malformed input, unknown
    /// fields, or empty identity components.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StorageError::serialization_with_source("decode refresh message", e))
    }
}
