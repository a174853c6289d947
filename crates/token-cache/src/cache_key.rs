//! Cache key newtype.
//!
//! A cache key partitions the token cache store: one key, one account's
//! serialized token state. Keys are computed by the caller (a stable session
//! identifier for interactive sign-in, or the inbound bearer token's signature
//! for on-behalf-of calls) and are otherwise opaque.

use std::fmt;

/// Opaque partition key for the token cache byte store.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a caller-computed key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the on-behalf-of key from a compact JWS bearer token.
    ///
    /// Returns the raw signature segment (everything after the second `.`).
    /// The token is not decoded or validated; that already happened upstream.
    #[must_use]
    pub fn from_bearer_token(token: &str) -> Option<Self> {
        let mut parts = token.trim().splitn(3, '.');
        let header = parts.next()?;
        let payload = parts.next()?;
        let signature = parts.next()?;

        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return None;
        }
        if signature.contains('.') {
            // JWE or otherwise malformed
            return None;
        }

        Some(Self(signature.to_string()))
    }

    /// The key as stored in the byte store.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty key puts the provider in pass-through mode.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Keys derived from bearer signatures are credentials-adjacent; keep them out
// of debug output and only show a short prefix.
impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "CacheKey({prefix}…)")
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}
