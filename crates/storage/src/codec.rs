//! Secret encryption boundary.
//!
//! Secrets are stored at rest as a [`SealedSecret`]: an explicit format
//! version tag followed by opaque ciphertext bytes. The tag lets the cipher
//! change without a flag day; nothing outside a [`SecretCodec`] interprets
//! it.
//!
//! [`AesGcmSecretCodec`] implements format version
//! [`AES_GCM_FORMAT_V1`]: a 12-byte random nonce followed by AES-256-GCM
//! ciphertext and tag, authenticated with a fixed associated-data string.
//!
//! Decrypted secrets are held in a [`SecretString`], which zeroizes on drop
//! and never prints its contents.

use std::{fmt, sync::Arc};

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, OsRng, Payload, rand_core::RngCore},
};
use thiserror::Error;
use zeroize::Zeroizing;

/// Format tag for AES-256-GCM sealed secrets.
pub const AES_GCM_FORMAT_V1: u8 = 1;

/// AES-256 key length in bytes.
pub const AES_GCM_KEY_LEN: usize = 32;

const AES_GCM_NONCE_LEN: usize = 12;
const AES_GCM_AAD: &[u8] = b"paygate-tenant-secret-v1";

/// Errors raised while sealing or opening a secret.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The version tag is not handled by this codec.
    #[error("unsupported secret format version: {0}")]
    UnsupportedVersion(u8),
    /// The ciphertext envelope is too short or otherwise malformed.
    #[error("malformed secret envelope: {0}")]
    Malformed(&'static str),
    /// Authentication failed; wrong key or tampered ciphertext.
    #[error("secret integrity check failed")]
    Integrity,
    /// The plaintext is not valid UTF-8.
    #[error("secret plaintext is not valid UTF-8")]
    InvalidUtf8,
    /// The configured key material is unusable.
    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),
}

/// A secret as stored at rest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedSecret {
    /// Format/version tag, passed through to the codec untouched.
    pub version: u8,
    /// Opaque ciphertext bytes.
    pub ciphertext: Vec<u8>,
}

/// A decrypted secret in its usable form.
///
/// Cheap to clone; the plaintext is zeroized when the last clone drops.
/// `Debug` is redacted.
#[derive(Clone)]
pub struct SecretString(Arc<Zeroizing<String>>);

impl SecretString {
    /// Wraps a plaintext secret.
    #[must_use]
    pub fn new(plaintext: String) -> Self {
        Self(Arc::new(Zeroizing::new(plaintext)))
    }

    /// Exposes the plaintext for signing.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for SecretString {}

/// Encrypt/decrypt contract for the secret field of a configuration record.
///
/// Implementations must be pure: the same sealed input always opens to the
/// same plaintext.
pub trait SecretCodec: Send + Sync {
    /// Opens a sealed secret.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the version is unsupported, the envelope is
    /// malformed, or authentication fails.
    fn decrypt(&self, version: u8, ciphertext: &[u8]) -> Result<SecretString, CodecError>;

    /// Seals a plaintext secret under this codec's current format version.
    ///
    /// Used by the administrative write path and tests; the resolver never
    /// re-encrypts.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if encryption fails.
    fn encrypt(&self, plaintext: &str) -> Result<SealedSecret, CodecError>;
}

/// AES-256-GCM secret codec (format version [`AES_GCM_FORMAT_V1`]).
pub struct AesGcmSecretCodec {
    cipher: Aes256Gcm,
}

impl AesGcmSecretCodec {
    /// Creates a codec from 32 bytes of key material.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if `key` is not 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CodecError> {
        if key.len() != AES_GCM_KEY_LEN {
            return Err(CodecError::InvalidKey("expected 32 bytes"));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CodecError::InvalidKey("rejected by cipher"))?;
        Ok(Self { cipher })
    }
}

impl fmt::Debug for AesGcmSecretCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmSecretCodec").finish_non_exhaustive()
    }
}

impl SecretCodec for AesGcmSecretCodec {
    fn decrypt(&self, version: u8, ciphertext: &[u8]) -> Result<SecretString, CodecError> {
        if version != AES_GCM_FORMAT_V1 {
            return Err(CodecError::UnsupportedVersion(version));
        }
        if ciphertext.len() <= AES_GCM_NONCE_LEN {
            return Err(CodecError::Malformed("envelope shorter than nonce"));
        }
        let (nonce, sealed) = ciphertext.split_at(AES_GCM_NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(nonce.into(), Payload { msg: sealed, aad: AES_GCM_AAD })
                .map_err(|_| CodecError::Integrity)?,
        );
        let text = std::str::from_utf8(&plaintext).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(SecretString::new(text.to_owned()))
    }

    fn encrypt(&self, plaintext: &str) -> Result<SealedSecret, CodecError> {
        let mut nonce = [0u8; AES_GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt((&nonce).into(), Payload { msg: plaintext.as_bytes(), aad: AES_GCM_AAD })
            .map_err(|_| CodecError::Malformed("encryption failed"))?;

        let mut ciphertext = Vec::with_capacity(AES_GCM_NONCE_LEN + sealed.len());
        ciphertext.extend_from_slice(&nonce);
        ciphertext.extend_from_slice(&sealed);
        Ok(SealedSecret { version: AES_GCM_FORMAT_V1, ciphertext })
    }
}
