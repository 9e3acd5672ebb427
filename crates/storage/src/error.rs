//! Storage error types and result alias.
//!
//! This module defines the errors that can occur at the backing-store
//! boundary. Every [`BackingStore`](crate::BackingStore) implementation maps
//! its transport-specific failures onto [`StorageError`].
//!
//! # Error Types
//!
//! - [`StorageError::Connection`] - Network or connection-related failures
//! - [`StorageError::Timeout`] - The store did not answer within its own bound
//! - [`StorageError::Serialization`] - A stored value could not be decoded
//! - [`StorageError::Internal`] - Backend-specific internal errors
//! - [`StorageError::Closed`] - A pub/sub channel was closed by the transport
//!
//! Absence is not an error: `get` returns `Ok(None)` for a missing key.
//!
//! # Example
//!
//! ```
//! use paygate_storage::{StorageError, StorageResult};
//!
//! fn lookup(_key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::connection("store unreachable"))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during backing-store operations.
///
/// Errors preserve their source chain via the `#[source]` attribute, enabling
/// structured logging to display the full error context.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Raised when a stored value cannot be decoded. This typically indicates
    /// data corruption or a schema mismatch between writer and reader.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out inside the backing store.
    #[error("Operation timeout")]
    Timeout,

    /// The pub/sub channel was closed by the transport.
    #[error("Channel closed: {channel}")]
    Closed {
        /// Name of the channel that closed.
        channel: String,
    },
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Closed` error for the given channel.
    #[must_use]
    pub fn closed(channel: impl Into<String>) -> Self {
        Self::Closed { channel: channel.into() }
    }

    /// Returns `true` if the error indicates the store is temporarily
    /// unavailable and the operation may succeed on retry.
    ///
    /// Serialization and internal errors are definitive responses from the
    /// store and are not transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout | Self::Closed { .. })
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A value is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for display.
        value: String,
        /// The minimum allowed value, rendered for display.
        min: String,
    },

    /// Two related values are inconsistent with each other.
    #[error("{field} is invalid: {reason}")]
    InvalidRange {
        /// Name of the offending field.
        field: &'static str,
        /// Why the combination was rejected.
        reason: String,
    },

    /// A required value is empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },
}
