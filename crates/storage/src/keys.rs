//! Deterministic cache and storage key construction.
//!
//! Keys are built from [`TenantIdentity`] components joined by `:`. The
//! provider component is always the canonical lowercase form, so identities
//! that compare equal always produce the same key.
//!
//! Components are escaped (`%` → `%25`, `:` → `%3A`) before joining, which
//! keeps the encoding injective: no two distinct identities can collide on a
//! key by embedding the delimiter in a component.
//!
//! | Key | Format |
//! |-----|--------|
//! | config cache key | `config:{provider}:{realm}:{profile}` |
//! | authz cache key | `authz:{provider}:{realm}` |
//! | realm scope | `{provider}:{realm}` |
//! | stored config record | `tenant-config:{provider}:{realm}:{profile}` |
//! | stored profile set | `tenant-profiles:{provider}:{realm}` |

use std::{borrow::Cow, fmt};

use crate::types::{ProviderName, RealmId, TenantIdentity};

/// Namespace prefix for decoded configuration cache entries.
pub const CONFIG_NAMESPACE: &str = "config";

/// Namespace prefix for authorization-set cache entries.
pub const AUTHZ_NAMESPACE: &str = "authz";

/// Storage prefix for encrypted configuration records.
pub const STORED_CONFIG_PREFIX: &str = "tenant-config";

/// Storage prefix for realm profile membership sets.
pub const STORED_PROFILES_PREFIX: &str = "tenant-profiles";

/// A cache key together with the realm scope it belongs to.
///
/// The scope lets a cache evict every key under a realm without scanning.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    key: String,
    scope: String,
}

impl CacheKey {
    /// Returns the full key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Returns the realm scope (`{provider}:{realm}`) of this key.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Escapes a key component so it never contains the `:` delimiter.
#[must_use]
pub fn escape_component(component: &str) -> Cow<'_, str> {
    if !component.contains([':', '%']) {
        return Cow::Borrowed(component);
    }
    let mut escaped = String::with_capacity(component.len() + 4);
    for ch in component.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Reverses [`escape_component`].
///
/// Returns `None` if `escaped` contains an unknown escape sequence or a raw
/// delimiter.
#[must_use]
pub fn unescape_component(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(idx) = rest.find(['%', ':']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if tail.starts_with("%25") {
            out.push('%');
        } else if tail.starts_with("%3A") {
            out.push(':');
        } else {
            return None;
        }
        rest = &tail[3..];
    }
    out.push_str(rest);
    Some(out)
}

/// Returns the realm scope shared by every key under `(provider, realm)`.
#[must_use]
pub fn realm_scope(provider: &ProviderName, realm: &RealmId) -> String {
    format!("{}:{}", escape_component(&provider.canonical()), escape_component(realm.as_str()))
}

/// Cache key for the decoded configuration of `identity`.
///
/// # Examples
///
/// ```
/// use paygate_storage::{TenantIdentity, keys::config_key};
///
/// let identity = TenantIdentity::parse("Alipay", "R1", "P1").unwrap();
/// assert_eq!(config_key(&identity).as_str(), "config:alipay:R1:P1");
/// ```
#[must_use]
pub fn config_key(identity: &TenantIdentity) -> CacheKey {
    let scope = realm_scope(identity.provider(), identity.realm_id());
    let key = format!(
        "{CONFIG_NAMESPACE}:{scope}:{}",
        escape_component(identity.profile_id().as_str())
    );
    CacheKey { key, scope }
}

/// Cache key for the authorization set of `(provider, realm)`.
#[must_use]
pub fn authz_key(provider: &ProviderName, realm: &RealmId) -> CacheKey {
    let scope = realm_scope(provider, realm);
    CacheKey { key: format!("{AUTHZ_NAMESPACE}:{scope}"), scope }
}

/// Backing-store key holding the encrypted configuration record.
#[must_use]
pub fn stored_config_key(identity: &TenantIdentity) -> String {
    format!(
        "{STORED_CONFIG_PREFIX}:{}:{}",
        realm_scope(identity.provider(), identity.realm_id()),
        escape_component(identity.profile_id().as_str())
    )
}

/// Backing-store key holding the authorized profile set of a realm.
#[must_use]
pub fn stored_profiles_key(provider: &ProviderName, realm: &RealmId) -> String {
    format!("{STORED_PROFILES_PREFIX}:{}", realm_scope(provider, realm))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn identity(provider: &str, realm: &str, profile: &str) -> TenantIdentity {
        TenantIdentity::parse(provider, realm, profile).unwrap()
    }

    #[test]
    fn test_key_formats() {
        let id = identity("WeChat", "R1", "P1");
        assert_eq!(config_key(&id).as_str(), "config:wechat:R1:P1");
        assert_eq!(config_key(&id).scope(), "wechat:R1");
        assert_eq!(authz_key(id.provider(), id.realm_id()).as_str(), "authz:wechat:R1");
        assert_eq!(stored_config_key(&id), "tenant-config:wechat:R1:P1");
        assert_eq!(stored_profiles_key(id.provider(), id.realm_id()), "tenant-profiles:wechat:R1");
    }

    #[test]
    fn test_equal_identities_produce_equal_keys() {
        let a = identity("Alipay", "R1", "P1");
        let b = identity("ALIPAY", "R1", "P1");
        assert_eq!(a, b);
        assert_eq!(config_key(&a), config_key(&b));
    }

    #[test]
    fn test_delimiter_cannot_forge_another_tenant() {
        let a = identity("alipay", "R1:P1", "X");
        let b = identity("alipay", "R1", "P1:X");
        assert_ne!(config_key(&a), config_key(&b));
        assert_eq!(config_key(&a).as_str(), "config:alipay:R1%3AP1:X");
    }

    #[test]
    fn test_config_and_authz_share_scope() {
        let id = identity("alipay", "R1", "P9");
        assert_eq!(config_key(&id).scope(), authz_key(id.provider(), id.realm_id()).scope());
    }

    #[test]
    fn test_unescape_rejects_malformed() {
        assert_eq!(unescape_component("a%2"), None);
        assert_eq!(unescape_component("a:b"), None);
        assert_eq!(unescape_component("a%41"), None);
    }

    proptest! {
        /// Escaping then unescaping any component must yield the original.
        #[test]
        fn escape_unescape_round_trip(component in ".*") {
            let escaped = escape_component(&component);
            prop_assert!(!escaped.contains(':'));
            prop_assert_eq!(unescape_component(&escaped), Some(component));
        }

        /// Distinct (realm, profile) pairs never map to the same config key.
        #[test]
        fn config_keys_are_injective(
            r1 in "[a-z:%]{1,6}", p1 in "[a-z:%]{1,6}",
            r2 in "[a-z:%]{1,6}", p2 in "[a-z:%]{1,6}",
        ) {
            prop_assume!(!r1.trim().is_empty() && !p1.trim().is_empty());
            prop_assume!(!r2.trim().is_empty() && !p2.trim().is_empty());
            let a = identity("alipay", &r1, &p1);
            let b = identity("alipay", &r2, &p2);
            prop_assert_eq!(a == b, config_key(&a) == config_key(&b));
        }
    }
}
