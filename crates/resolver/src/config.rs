//! Resolver configuration.
//!
//! [`ResolverConfig`] carries every timeout and TTL the resolver uses. It is
//! built either through its validated builder or deserialized from a config
//! file, where durations use humantime syntax (`"500ms"`, `"24h"`, `"30days"`):
//!
//! ```
//! use paygate_resolver::ResolverConfig;
//!
//! let config: ResolverConfig = serde_json::from_str(
//!     r#"{ "authz_timeout": "250ms", "negative_ttl": "1m" }"#,
//! )
//! .unwrap();
//! assert_eq!(config.authz_timeout().as_millis(), 250);
//! assert_eq!(config.config_timeout().as_secs(), 2);
//! ```
//!
//! Both paths run the same validation, so an invalid file is rejected at load
//! time rather than at first use.

use std::time::Duration;

use paygate_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default cold-start bound for authorization-set lookups.
pub const DEFAULT_AUTHZ_TIMEOUT: Duration = Duration::from_millis(500);

/// Default cold-start bound for configuration-record lookups.
pub const DEFAULT_CONFIG_TIMEOUT: Duration = Duration::from_secs(2);

/// Default sliding window for positive entries (24 hours).
pub const DEFAULT_SLIDING_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default absolute cap for positive entries (30 days).
pub const DEFAULT_ABSOLUTE_CAP: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default lifetime of a cached empty authorization set.
pub const DEFAULT_EMPTY_AUTHZ_TTL: Duration = Duration::from_secs(60);

/// Default lifetime of a negative entry.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default pub/sub channel carrying refresh messages.
pub const DEFAULT_REFRESH_CHANNEL: &str = "paygate:tenant-refresh";

/// Default delay before the listener resubscribes after its subscription
/// closes.
pub const DEFAULT_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Smallest timeout or TTL accepted anywhere in the configuration.
pub const MIN_DURATION: Duration = Duration::from_millis(1);

fn check_min(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value < MIN_DURATION {
        return Err(ConfigError::BelowMinimum {
            field,
            min: format!("{MIN_DURATION:?}"),
            value: format!("{value:?}"),
        });
    }
    Ok(())
}

/// Expiration policy for a positive cache entry.
///
/// Every read pushes the entry's sliding deadline to `now + sliding`, but
/// never past `created + absolute`.
///
/// # Validation
///
/// - both windows must be at least [`MIN_DURATION`]
/// - `sliding <= absolute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTtlPolicy", into = "RawTtlPolicy")]
pub struct TtlPolicy {
    sliding: Duration,
    absolute: Duration,
}

impl TtlPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either window is below [`MIN_DURATION`] or
    /// `sliding` exceeds `absolute`.
    pub fn new(sliding: Duration, absolute: Duration) -> Result<Self, ConfigError> {
        check_min("sliding", sliding)?;
        check_min("absolute", absolute)?;
        if sliding > absolute {
            return Err(ConfigError::InvalidRange {
                field: "sliding",
                reason: format!("sliding window {sliding:?} exceeds absolute cap {absolute:?}"),
            });
        }
        Ok(Self { sliding, absolute })
    }

    /// A policy without sliding renewal: the entry lives exactly `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `ttl` is below
    /// [`MIN_DURATION`].
    pub fn fixed(ttl: Duration) -> Result<Self, ConfigError> {
        Self::new(ttl, ttl)
    }

    /// Returns the sliding window.
    #[must_use]
    pub fn sliding(&self) -> Duration {
        self.sliding
    }

    /// Returns the absolute cap.
    #[must_use]
    pub fn absolute(&self) -> Duration {
        self.absolute
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self { sliding: DEFAULT_SLIDING_WINDOW, absolute: DEFAULT_ABSOLUTE_CAP }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTtlPolicy {
    #[serde(with = "humantime_serde")]
    sliding: Duration,
    #[serde(with = "humantime_serde")]
    absolute: Duration,
}

impl TryFrom<RawTtlPolicy> for TtlPolicy {
    type Error = ConfigError;

    fn try_from(raw: RawTtlPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.sliding, raw.absolute)
    }
}

impl From<TtlPolicy> for RawTtlPolicy {
    fn from(policy: TtlPolicy) -> Self {
        Self { sliding: policy.sliding, absolute: policy.absolute }
    }
}

/// Timeouts, TTLs and channel settings for a [`ConfigResolver`](crate::ConfigResolver).
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `authz_timeout` | 500ms |
/// | `config_timeout` | 2s |
/// | `config_ttl` | sliding 24h, absolute 30 days |
/// | `authz_ttl` | sliding 24h, absolute 30 days |
/// | `empty_authz_ttl` | 60s |
/// | `negative_ttl` | 5m |
/// | `refresh_channel` | `paygate:tenant-refresh` |
/// | `resubscribe_backoff` | 1s |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawResolverConfig", into = "RawResolverConfig")]
pub struct ResolverConfig {
    pub(crate) authz_timeout: Duration,
    pub(crate) config_timeout: Duration,
    pub(crate) config_ttl: TtlPolicy,
    pub(crate) authz_ttl: TtlPolicy,
    pub(crate) empty_authz_ttl: Duration,
    pub(crate) negative_ttl: Duration,
    pub(crate) refresh_channel: String,
    pub(crate) resubscribe_backoff: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            authz_timeout: DEFAULT_AUTHZ_TIMEOUT,
            config_timeout: DEFAULT_CONFIG_TIMEOUT,
            config_ttl: TtlPolicy::default(),
            authz_ttl: TtlPolicy::default(),
            empty_authz_ttl: DEFAULT_EMPTY_AUTHZ_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            refresh_channel: DEFAULT_REFRESH_CHANNEL.to_owned(),
            resubscribe_backoff: DEFAULT_RESUBSCRIBE_BACKOFF,
        }
    }
}

#[bon::bon]
impl ResolverConfig {
    /// Creates a validated resolver configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any timeout or TTL is below
    /// [`MIN_DURATION`] or `refresh_channel` is empty.
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        #[builder(default = DEFAULT_AUTHZ_TIMEOUT)] authz_timeout: Duration,
        #[builder(default = DEFAULT_CONFIG_TIMEOUT)] config_timeout: Duration,
        #[builder(default)] config_ttl: TtlPolicy,
        #[builder(default)] authz_ttl: TtlPolicy,
        #[builder(default = DEFAULT_EMPTY_AUTHZ_TTL)] empty_authz_ttl: Duration,
        #[builder(default = DEFAULT_NEGATIVE_TTL)] negative_ttl: Duration,
        #[builder(into, default = DEFAULT_REFRESH_CHANNEL.to_owned())] refresh_channel: String,
        #[builder(default = DEFAULT_RESUBSCRIBE_BACKOFF)] resubscribe_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        check_min("authz_timeout", authz_timeout)?;
        check_min("config_timeout", config_timeout)?;
        check_min("empty_authz_ttl", empty_authz_ttl)?;
        check_min("negative_ttl", negative_ttl)?;
        check_min("resubscribe_backoff", resubscribe_backoff)?;
        if refresh_channel.trim().is_empty() {
            return Err(ConfigError::Empty { field: "refresh_channel" });
        }
        Ok(Self {
            authz_timeout,
            config_timeout,
            config_ttl,
            authz_ttl,
            empty_authz_ttl,
            negative_ttl,
            refresh_channel,
            resubscribe_backoff,
        })
    }

    /// Returns the cold-start bound for authorization lookups.
    #[must_use]
    pub fn authz_timeout(&self) -> Duration {
        self.authz_timeout
    }

    /// Returns the cold-start bound for configuration lookups.
    #[must_use]
    pub fn config_timeout(&self) -> Duration {
        self.config_timeout
    }

    /// Returns the expiration policy for configuration records.
    #[must_use]
    pub fn config_ttl(&self) -> TtlPolicy {
        self.config_ttl
    }

    /// Returns the expiration policy for non-empty authorization sets.
    #[must_use]
    pub fn authz_ttl(&self) -> TtlPolicy {
        self.authz_ttl
    }

    /// Returns the lifetime of a cached empty authorization set.
    #[must_use]
    pub fn empty_authz_ttl(&self) -> Duration {
        self.empty_authz_ttl
    }

    /// Non-sliding policy applied to empty authorization sets.
    pub(crate) fn empty_authz_policy(&self) -> TtlPolicy {
        TtlPolicy { sliding: self.empty_authz_ttl, absolute: self.empty_authz_ttl }
    }

    /// Returns the lifetime of a negative entry.
    #[must_use]
    pub fn negative_ttl(&self) -> Duration {
        self.negative_ttl
    }

    /// Returns the refresh channel name.
    #[must_use]
    pub fn refresh_channel(&self) -> &str {
        &self.refresh_channel
    }

    /// Returns the listener's resubscribe delay.
    #[must_use]
    pub fn resubscribe_backoff(&self) -> Duration {
        self.resubscribe_backoff
    }
}

#[derive(Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawResolverConfig {
    #[serde(with = "humantime_serde")]
    authz_timeout: Duration,
    #[serde(with = "humantime_serde")]
    config_timeout: Duration,
    config_ttl: TtlPolicy,
    authz_ttl: TtlPolicy,
    #[serde(with = "humantime_serde")]
    empty_authz_ttl: Duration,
    #[serde(with = "humantime_serde")]
    negative_ttl: Duration,
    refresh_channel: String,
    #[serde(with = "humantime_serde")]
    resubscribe_backoff: Duration,
}

impl Default for RawResolverConfig {
    fn default() -> Self {
        ResolverConfig::default().into()
    }
}

impl TryFrom<RawResolverConfig> for ResolverConfig {
    type Error = ConfigError;

    fn try_from(raw: RawResolverConfig) -> Result<Self, Self::Error> {
        Self::builder()
            .authz_timeout(raw.authz_timeout)
            .config_timeout(raw.config_timeout)
            .config_ttl(raw.config_ttl)
            .authz_ttl(raw.authz_ttl)
            .empty_authz_ttl(raw.empty_authz_ttl)
            .negative_ttl(raw.negative_ttl)
            .refresh_channel(raw.refresh_channel)
            .resubscribe_backoff(raw.resubscribe_backoff)
            .build()
    }
}

impl From<ResolverConfig> for RawResolverConfig {
    fn from(config: ResolverConfig) -> Self {
        Self {
            authz_timeout: config.authz_timeout,
            config_timeout: config.config_timeout,
            config_ttl: config.config_ttl,
            authz_ttl: config.authz_ttl,
            empty_authz_ttl: config.empty_authz_ttl,
            negative_ttl: config.negative_ttl,
            refresh_channel: config.refresh_channel,
            resubscribe_backoff: config.resubscribe_backoff,
        }
    }
}
