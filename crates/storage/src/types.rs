//! Tenant identity types.
//!
//! A tenant is addressed by the triple `(ProviderName, RealmId, ProfileId)`.
//! Each component is a distinct newtype so that passing a realm where a
//! profile is expected is a compile-time error.
//!
//! # Comparison Rules
//!
//! - [`ProviderName`] compares and hashes case-insensitively (`Alipay` and `alipay` are the same
//!   provider).
//! - [`RealmId`] and [`ProfileId`] are case-sensitive.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected tenant identity component.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// A mandatory component was empty or whitespace-only.
    #[error("{component} must not be empty")]
    Empty {
        /// Which component was empty.
        component: &'static str,
    },
}

/// Macro to define a case-sensitive string newtype for identity components.
///
/// Each generated type:
/// - Wraps a non-empty `String`
/// - Derives `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Serializes transparently as a string
/// - Implements `Display` and `AsRef<str>`
macro_rules! define_component {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new component, rejecting empty values.
            ///
            /// # Errors
            ///
            /// Returns [`IdentityError::Empty`] if `value` is empty or whitespace-only.
            pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdentityError::Empty { component: $label });
                }
                Ok(Self(value))
            }

            /// Returns the component as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdentityError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_component!(
    /// The tenant's owning business entity, e.g. an ISV's merchant-service-provider id.
    ///
    /// Case-sensitive.
    ///
    /// # Examples
    ///
    /// ```
    /// use paygate_storage::RealmId;
    ///
    /// let realm = RealmId::new("2088001").unwrap();
    /// assert_eq!(realm.as_str(), "2088001");
    /// assert!(RealmId::new("  ").is_err());
    /// ```
    RealmId,
    "realm_id"
);

define_component!(
    /// A specific execution unit under a realm, e.g. a sub-merchant app id.
    ///
    /// Case-sensitive.
    ProfileId,
    "profile_id"
);

/// Payment provider name (`Alipay`, `WeChat`, ...).
///
/// Compares and hashes case-insensitively. The original spelling is kept for
/// display; [`canonical`](Self::canonical) returns the lowercase form used in
/// cache and storage keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderName(String);

impl ProviderName {
    /// Creates a provider name, rejecting empty values.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] if `value` is empty or whitespace-only.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdentityError::Empty { component: "provider_name" });
        }
        Ok(Self(value))
    }

    /// Returns the name as originally spelled.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the lowercase form used for keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for ProviderName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for ProviderName {}

impl Hash for ProviderName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl TryFrom<String> for ProviderName {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProviderName> for String {
    fn from(value: ProviderName) -> Self {
        value.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `(ProviderName, RealmId, ProfileId)` triple identifying one tenant.
///
/// Immutable, created per request. All three components are mandatory:
/// default-profile selection is not performed here, callers supply a
/// concrete profile.
///
/// # Examples
///
/// ```
/// use paygate_storage::TenantIdentity;
///
/// let a = TenantIdentity::parse("Alipay", "R1", "P1").unwrap();
/// let b = TenantIdentity::parse("ALIPAY", "R1", "P1").unwrap();
/// assert_eq!(a, b);
///
/// let c = TenantIdentity::parse("Alipay", "r1", "P1").unwrap();
/// assert_ne!(a, c);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantIdentity {
    provider: ProviderName,
    realm_id: RealmId,
    profile_id: ProfileId,
}

impl TenantIdentity {
    /// Creates an identity from already-validated components.
    #[must_use]
    pub fn new(provider: ProviderName, realm_id: RealmId, profile_id: ProfileId) -> Self {
        Self { provider, realm_id, profile_id }
    }

    /// Creates an identity from raw strings.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Empty`] naming the first empty component.
    pub fn parse(
        provider: impl Into<String>,
        realm_id: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        Ok(Self {
            provider: ProviderName::new(provider)?,
            realm_id: RealmId::new(realm_id)?,
            profile_id: ProfileId::new(profile_id)?,
        })
    }

    /// Returns the provider name.
    #[must_use]
    pub fn provider(&self) -> &ProviderName {
        &self.provider
    }

    /// Returns the realm id.
    #[must_use]
    pub fn realm_id(&self) -> &RealmId {
        &self.realm_id
    }

    /// Returns the profile id.
    #[must_use]
    pub fn profile_id(&self) -> &ProfileId {
        &self.profile_id
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.realm_id, self.profile_id)
    }
}
