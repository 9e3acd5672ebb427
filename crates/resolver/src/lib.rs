//! # Paygate Tenant Configuration Resolver
//!
//! Resolves a `(provider, realm, profile)` tenant identity to its decrypted
//! gateway configuration, fast enough to sit on every outbound payment
//! request.
//!
//! This crate provides:
//! - **Authorization before disclosure**: a profile must be in its realm's authorized set before its
//!   secret is read
//! - **Pinned local caching**: sliding and absolute expiry, negative entries, no memory-pressure
//!   eviction
//! - **Stampede protection**: one backing-store load per key, however many callers miss at once
//! - **Cold-start bounds**: a slow new tenant fails fast with a retryable error instead of
//!   starving established tenants
//! - **Cross-process coherence**: a pub/sub listener applies targeted evictions
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use paygate_resolver::{ConfigResolver, ResolverConfig};
//! use paygate_storage::{AesGcmSecretCodec, MemoryBackingStore, TenantIdentity};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryBackingStore::new());
//! let codec = Arc::new(AesGcmSecretCodec::new(&[0x42; 32])?);
//! let resolver = ConfigResolver::new(store, codec, ResolverConfig::default());
//! let listener = resolver.spawn_listener();
//!
//! let tenant = TenantIdentity::parse("Alipay", "2088001", "2021000001")?;
//! match resolver.resolve(&tenant).await {
//!     Ok(record) => println!("sending to {}", record.gateway_endpoint),
//!     Err(err) if err.is_retryable() => println!("retry later: {err}"),
//!     Err(err) => println!("rejected: {err}"),
//! }
//!
//! listener.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Realm membership checks.
pub mod authz;
/// Resolver configuration.
pub mod config;
/// Resolution error types.
pub mod error;
/// Refresh-message listener.
pub mod listener;
/// Sliding/absolute expiry cache.
pub mod local_cache;
/// Per-cache counters.
pub mod metrics;
/// The resolution entry point.
pub mod resolver;
/// Per-key load coordination.
pub mod stampede;

// Re-export key types for convenience
pub use authz::{AuthorizationIndex, AuthorizationSet};
pub use config::{ResolverConfig, TtlPolicy};
pub use error::{ResolveError, Result};
pub use listener::{InvalidationListener, InvalidationTargets};
pub use local_cache::{CacheEntry, LoadTicket, LocalCache};
pub use metrics::{CacheMetricsSnapshot, ResolverMetricsSnapshot};
pub use resolver::ConfigResolver;
pub use stampede::{Loaded, StampedeGuard};
