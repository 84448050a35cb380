//! Namespaced cache keys.
//!
//! A [`Namespace`] is a key prefix shared by a family of entries, such as
//! every payload cached for one session. Namespaces always end with the
//! separator, so `payload/<a>/` can never match keys of `payload/<ab>/`, and
//! invalidating a namespace removes exactly its own family.

use std::fmt;

/// Separator between namespace segments.
pub const SEPARATOR: char = '/';

/// A key prefix identifying a family of cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    /// Create a top-level namespace such as `payload/`.
    pub fn new(kind: &str) -> Self {
        let mut prefix = String::with_capacity(kind.len() + 1);
        prefix.push_str(kind.trim_matches(SEPARATOR));
        prefix.push(SEPARATOR);
        Self { prefix }
    }

    /// Narrow this namespace by one segment: `payload/` -> `payload/<scope>/`.
    pub fn scoped(&self, scope: impl fmt::Display) -> Self {
        Self {
            prefix: format!("{}{}{}", self.prefix, scope, SEPARATOR),
        }
    }

    /// Build a key inside this namespace.
    pub fn key(&self, segment: impl fmt::Display) -> CacheKey {
        CacheKey(format!("{}{}", self.prefix, segment))
    }

    /// The raw prefix, separator included.
    pub fn as_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        key.has_prefix(&self.prefix)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

/// A fully qualified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a raw key. Prefer [`Namespace::key`] so keys stay invalidatable
    /// by namespace.
    pub fn raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// True when the key equals `prefix` or starts with it.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}
