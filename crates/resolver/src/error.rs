//! Resolution error types.
//!
//! Callers branch on the variant, never on the message text:
//!
//! | Variant | Meaning | Caller action |
//! |---------|---------|---------------|
//! | [`ResolveError::NotAuthorized`] | profile is not in the realm's authorized set | reject, do not retry |
//! | [`ResolveError::NotFound`] | no usable record exists | reject, do not retry within the negative TTL |
//! | [`ResolveError::ColdStartTimeout`] | lock wait, load, or store call exceeded its bound | retry with backoff |
//! | [`ResolveError::BackingStoreUnavailable`] | the store failed the call | retry only if [`is_retryable`](ResolveError::is_retryable) |
//! | [`ResolveError::Cancelled`] | the caller cancelled the resolution | none |
//!
//! `NotAuthorized` and `NotFound` render the same opaque message so that a
//! denial never tells the caller whether the profile, the realm, or the
//! stored record was the problem.

use paygate_storage::StorageError;
use thiserror::Error;

/// Opaque denial text shared by [`ResolveError::NotAuthorized`] and
/// [`ResolveError::NotFound`].
pub const OPAQUE_DENIAL: &str = "tenant configuration unavailable";

/// Errors surfaced by the resolver.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// The identity failed the authorization-index check.
    #[error("{OPAQUE_DENIAL}")]
    NotAuthorized,

    /// Confirmed absence, or a record that exists but cannot be used.
    #[error("{OPAQUE_DENIAL}")]
    NotFound,

    /// A per-key lock wait or backing-store load exceeded its time bound,
    /// or the store itself reported [`StorageError::Timeout`].
    #[error("cold start timed out")]
    ColdStartTimeout,

    /// The backing store failed the call.
    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// The caller's cancellation token fired before resolution finished.
    #[error("resolution cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Returns `true` for the two variants that must look identical to the
    /// caller.
    #[must_use]
    pub fn is_opaque_denial(&self) -> bool {
        matches!(self, Self::NotAuthorized | Self::NotFound)
    }

    /// Returns `true` if retrying later may succeed.
    ///
    /// Store failures defer to [`StorageError::is_transient`]: a record the
    /// store cannot decode stays undecodable on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ColdStartTimeout => true,
            Self::BackingStoreUnavailable(err) => err.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for ResolveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Timeout => ResolveError::ColdStartTimeout,
            err => ResolveError::BackingStoreUnavailable(err),
        }
    }
}

/// Result type alias for resolver operations.
pub type Result<T> = std::result::Result<T, ResolveError>;
