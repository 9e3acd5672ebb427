//! Tenant configuration records.
//!
//! A record exists in two shapes:
//!
//! - [`StoredConfigRecord`]: the backing-store representation. The secret is a [`SealedSecret`]
//!   (version tag + ciphertext) and nothing else is encrypted.
//! - [`ConfigRecord`]: the decoded, in-memory representation with the secret in usable form. This
//!   is the only shape ever held in a process cache.
//!
//! The field types are the encryption schema: only `secret` is ciphertext
//! at rest, every other field is plaintext.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{CodecError, SealedSecret, SecretCodec, SecretString},
    error::{StorageError, StorageResult},
    types::{ProfileId, ProviderName},
};

/// A resolved tenant configuration with its secret decrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigRecord {
    /// Provider this configuration signs for.
    pub provider: ProviderName,
    /// Profile the configuration belongs to.
    pub profile_id: ProfileId,
    /// Gateway endpoint outbound requests are sent to.
    pub gateway_endpoint: String,
    /// Signing credential in usable form.
    pub secret: SecretString,
}

/// The at-rest form of a [`ConfigRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredConfigRecord {
    /// Provider this configuration signs for.
    pub provider: ProviderName,
    /// Profile the configuration belongs to.
    pub profile_id: ProfileId,
    /// Gateway endpoint outbound requests are sent to.
    pub gateway_endpoint: String,
    /// Encrypted signing credential.
    pub secret: SealedSecret,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredConfigWire {
    provider: ProviderName,
    profile_id: ProfileId,
    gateway_endpoint: String,
    secret_version: u8,
    secret_ciphertext: String,
}

impl StoredConfigRecord {
    /// Seals `record`'s secret with `codec`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if encryption fails.
    pub fn seal(record: &ConfigRecord, codec: &dyn SecretCodec) -> Result<Self, CodecError> {
        Ok(Self {
            provider: record.provider.clone(),
            profile_id: record.profile_id.clone(),
            gateway_endpoint: record.gateway_endpoint.clone(),
            secret: codec.encrypt(record.secret.expose())?,
        })
    }

    /// Decrypts the secret, producing the in-memory record.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the secret cannot be opened.
    pub fn open(&self, codec: &dyn SecretCodec) -> Result<ConfigRecord, CodecError> {
        Ok(ConfigRecord {
            provider: self.provider.clone(),
            profile_id: self.profile_id.clone(),
            gateway_endpoint: self.gateway_endpoint.clone(),
            secret: codec.decrypt(self.secret.version, &self.secret.ciphertext)?,
        })
    }

    /// Serializes the record to the bytes stored in the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if encoding fails.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let wire = StoredConfigWire {
            provider: self.provider.clone(),
            profile_id: self.profile_id.clone(),
            gateway_endpoint: self.gateway_endpoint.clone(),
            secret_version: self.secret.version,
            secret_ciphertext: STANDARD.encode(&self.secret.ciphertext),
        };
        serde_json::to_vec(&wire)
            .map_err(|e| StorageError::serialization_with_source("encode config record", e))
    }

    /// Parses a record from backing-store bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] for malformed JSON or a
    /// ciphertext that is not valid base64.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        let wire: StoredConfigWire = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::serialization_with_source("decode config record", e))?;
        let ciphertext = STANDARD
            .decode(wire.secret_ciphertext.as_bytes())
            .map_err(|e| StorageError::serialization_with_source("decode secret ciphertext", e))?;
        Ok(Self {
            provider: wire.provider,
            profile_id: wire.profile_id,
            gateway_endpoint: wire.gateway_endpoint,
            secret: SealedSecret { version: wire.secret_version, ciphertext },
        })
    }
}
