//! Entity identity: composite keys and surrogate IDs.
//!
//! Every semantic subject (a page, a property, or a named subobject of a page)
//! is identified by an [`EntityKey`] `(title, namespace, interwiki, subobject)`.
//! The store assigns each key a compact surrogate [`EntityId`] on first
//! reference; property tables only ever store the surrogate.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Surrogate integer ID of an entity.
///
/// `0` is reserved and means "unknown" (or "not a redirect" when returned by
/// redirect lookups).
///
/// # Examples
///
/// ```
/// use semstore::EntityId;
///
/// assert!(EntityId::NONE.is_none());
/// assert_eq!(EntityId::new(42).get(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// The reserved "unknown" ID.
    pub const NONE: Self = Self(0);

    /// Wraps a raw surrogate value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw surrogate value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true for the reserved "unknown" ID.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<EntityId> for u32 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Namespace number of an entity.
pub type Namespace = i32;

/// Well-known namespaces.
pub mod namespace {
    use super::Namespace;

    pub const MEDIA: Namespace = -2;
    pub const SPECIAL: Namespace = -1;
    pub const MAIN: Namespace = 0;
    pub const USER: Namespace = 2;
    pub const FILE: Namespace = 6;
    pub const CATEGORY: Namespace = 14;
    pub const PROPERTY: Namespace = 102;
    pub const CONCEPT: Namespace = 108;
}

/// Reserved interwiki markers stored in the ID table's `smw_iw` column.
///
/// They never denote a real interwiki prefix; each one tags a special state
/// of the ID-table row.
pub mod interwiki {
    /// The row is a redirect stub kept alive for its surrogate ID.
    pub const REDIRECT: &str = ":smw-redi";
    /// The entity was deleted and awaits disposal.
    pub const OUTDATED: &str = ":smw-delete";
    /// A predefined property that has no user-visible page.
    pub const INTERNAL_PROPERTY: &str = ":smw-intprop";

    /// Returns true for markers that do not name a real interwiki.
    #[must_use]
    pub fn is_reserved(iw: &str) -> bool {
        iw.starts_with(":smw")
    }
}

fn title_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[#<>\[\]\|\{\}\n\r\t]").expect("valid title pattern"))
}

/// Composite natural key of an entity.
///
/// # Examples
///
/// ```
/// use semstore::entity::{namespace, EntityKey};
///
/// let page = EntityKey::new("Berlin", namespace::MAIN);
/// let sub = page.with_subobject("census-2020");
/// assert!(sub.is_subobject());
/// assert_eq!(sub.page(), page);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub title: String,
    pub namespace: Namespace,
    #[serde(default)]
    pub interwiki: String,
    #[serde(default)]
    pub subobject: String,
}

impl EntityKey {
    /// Creates a key for a local page.
    #[must_use]
    pub fn new(title: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            title: title.into(),
            namespace,
            interwiki: String::new(),
            subobject: String::new(),
        }
    }

    /// Creates a key from all four components.
    #[must_use]
    pub fn from_parts(
        title: impl Into<String>,
        namespace: Namespace,
        interwiki: impl Into<String>,
        subobject: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            namespace,
            interwiki: interwiki.into(),
            subobject: subobject.into(),
        }
    }

    /// Returns a copy with the given interwiki marker.
    #[must_use]
    pub fn with_interwiki(&self, interwiki: impl Into<String>) -> Self {
        Self {
            interwiki: interwiki.into(),
            ..self.clone()
        }
    }

    /// Returns a copy naming the given subobject of this page.
    #[must_use]
    pub fn with_subobject(&self, subobject: impl Into<String>) -> Self {
        Self {
            subobject: subobject.into(),
            ..self.clone()
        }
    }

    /// Returns the page this key belongs to (the key without its subobject).
    #[must_use]
    pub fn page(&self) -> Self {
        Self {
            subobject: String::new(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn is_subobject(&self) -> bool {
        !self.subobject.is_empty()
    }

    /// Returns true when the key carries one of the reserved interwiki markers.
    #[must_use]
    pub fn has_reserved_interwiki(&self) -> bool {
        interwiki::is_reserved(&self.interwiki)
    }

    /// Stable hash of the composite key, stored in `smw_hash`.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.title.as_bytes());
        hasher.update(b"#");
        hasher.update(self.namespace.to_string().as_bytes());
        hasher.update(b"#");
        hasher.update(self.interwiki.as_bytes());
        hasher.update(b"#");
        hasher.update(self.subobject.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Default sortkey: the title with underscores shown as spaces.
    #[must_use]
    pub fn default_sortkey(&self) -> String {
        self.title.replace('_', " ")
    }

    /// Checks that the key can be stored.
    ///
    /// # Errors
    /// Returns [`ValidationError::MalformedEntityKey`] for empty titles, titles
    /// or subobject names containing link syntax characters, and surrounding
    /// whitespace.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let malformed = |reason: &str| ValidationError::MalformedEntityKey {
            key: self.to_string(),
            reason: reason.to_string(),
        };

        if self.title.is_empty() {
            return Err(malformed("title is empty"));
        }
        if self.title.trim() != self.title {
            return Err(malformed("title has surrounding whitespace"));
        }
        if title_pattern().is_match(&self.title) {
            return Err(malformed("title contains an illegal character"));
        }
        if title_pattern().is_match(&self.subobject) {
            return Err(malformed("subobject name contains an illegal character"));
        }
        Ok(())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}",
            self.title, self.namespace, self.interwiki, self.subobject
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_none() {
        assert!(EntityId::NONE.is_none());
        assert!(!EntityId::new(1).is_none());
        assert_eq!(EntityId::default(), EntityId::NONE);
    }

    #[test]
    fn test_key_hash_is_stable_and_distinct() {
        let a = EntityKey::new("Foo", namespace::MAIN);
        let b = EntityKey::new("Foo", namespace::MAIN);
        assert_eq!(a.hash(), b.hash());

        assert_ne!(a.hash(), a.with_subobject("x").hash());
        assert_ne!(a.hash(), a.with_interwiki(interwiki::REDIRECT).hash());
        assert_ne!(a.hash(), EntityKey::new("Foo", namespace::PROPERTY).hash());
    }

    #[test]
    fn test_key_validation() {
        assert!(EntityKey::new("Foo_bar", namespace::MAIN).validate().is_ok());
        assert!(EntityKey::new("", namespace::MAIN).validate().is_err());
        assert!(EntityKey::new(" Foo", namespace::MAIN).validate().is_err());
        assert!(EntityKey::new("Foo[[x]]", namespace::MAIN).validate().is_err());
        assert!(EntityKey::new("Foo", namespace::MAIN)
            .with_subobject("a#b")
            .validate()
            .is_err());
    }

    #[test]
    fn test_page_strips_subobject() {
        let key = EntityKey::new("Foo", namespace::MAIN).with_subobject("_QUERY1");
        assert!(key.is_subobject());
        assert!(!key.page().is_subobject());
        assert_eq!(key.page().title, "Foo");
    }

    #[test]
    fn test_reserved_interwiki() {
        assert!(interwiki::is_reserved(interwiki::REDIRECT));
        assert!(interwiki::is_reserved(interwiki::OUTDATED));
        assert!(!interwiki::is_reserved("wikipedia"));
        assert!(!interwiki::is_reserved(""));
    }

    #[test]
    fn test_default_sortkey() {
        assert_eq!(EntityKey::new("New_York", namespace::MAIN).default_sortkey(), "New York");
    }
}
