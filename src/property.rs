//! Properties and the predefined property registry.
//!
//! A property is itself an entity in the property namespace. Predefined
//! properties (keys starting with `_`) own surrogate IDs in a reserved range
//! below the fixed-property upper bound, so they can be resolved without a
//! table lookup.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entity::{namespace, EntityId, EntityKey, Namespace};
use crate::error::ValidationError;
use crate::schema::DataItemKind;

/// Built-in properties with reserved IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PredefinedProperty {
    /// Declared datatype of a property.
    Type,
    /// Equivalent URI.
    Uri,
    /// Category membership.
    Instance,
    /// Display unit.
    Unit,
    /// Imported vocabulary.
    Import,
    /// Unit conversion factor.
    Conversion,
    /// External service link.
    Service,
    /// Allowed value.
    AllowsValue,
    /// Redirect target (stored in the subject-less redirect table).
    Redirect,
    /// Subproperty relation.
    SubpropertyOf,
    /// Subcategory relation.
    SubcategoryOf,
    /// Concept definition.
    Concept,
    /// Link from a page to one of its subobjects.
    Subobject,
    /// Embedded query.
    Ask,
    /// Modification date.
    ModificationDate,
    /// Creation date.
    CreationDate,
    /// Whether the page is new.
    NewPage,
    /// Last editor.
    LastEditor,
    /// Explicit sortkey.
    Sortkey,
}

impl PredefinedProperty {
    /// Every predefined property, in reserved-ID order.
    pub const ALL: [Self; 19] = [
        Self::Type,
        Self::Uri,
        Self::Instance,
        Self::Unit,
        Self::Import,
        Self::Conversion,
        Self::Service,
        Self::AllowsValue,
        Self::Redirect,
        Self::SubpropertyOf,
        Self::SubcategoryOf,
        Self::Concept,
        Self::Subobject,
        Self::Ask,
        Self::ModificationDate,
        Self::CreationDate,
        Self::NewPage,
        Self::LastEditor,
        Self::Sortkey,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Type => "_TYPE",
            Self::Uri => "_URI",
            Self::Instance => "_INST",
            Self::Unit => "_UNIT",
            Self::Import => "_IMPO",
            Self::Conversion => "_CONV",
            Self::Service => "_SERV",
            Self::AllowsValue => "_PVAL",
            Self::Redirect => "_REDI",
            Self::SubpropertyOf => "_SUBP",
            Self::SubcategoryOf => "_SUBC",
            Self::Concept => "_CONC",
            Self::Subobject => "_SOBJ",
            Self::Ask => "_ASK",
            Self::ModificationDate => "_MDAT",
            Self::CreationDate => "_CDAT",
            Self::NewPage => "_NEWP",
            Self::LastEditor => "_LEDT",
            Self::Sortkey => "_SKEY",
        }
    }

    /// Surrogate ID reserved for this property.
    #[must_use]
    pub const fn reserved_id(self) -> EntityId {
        EntityId::new(match self {
            Self::Type => 1,
            Self::Uri => 2,
            Self::Instance => 4,
            Self::Unit => 7,
            Self::Import => 8,
            Self::Conversion => 12,
            Self::Service => 13,
            Self::AllowsValue => 14,
            Self::Redirect => 15,
            Self::SubpropertyOf => 17,
            Self::SubcategoryOf => 18,
            Self::Concept => 19,
            Self::Subobject => 27,
            Self::Ask => 28,
            Self::ModificationDate => 29,
            Self::CreationDate => 30,
            Self::NewPage => 31,
            Self::LastEditor => 32,
            Self::Sortkey => 34,
        })
    }

    /// Data-item kind of the property's values.
    #[must_use]
    pub const fn kind(self) -> DataItemKind {
        match self {
            Self::Type
            | Self::Unit
            | Self::Import
            | Self::Conversion
            | Self::Service
            | Self::AllowsValue
            | Self::Sortkey => DataItemKind::Blob,
            Self::Uri => DataItemKind::Uri,
            Self::Instance
            | Self::Redirect
            | Self::SubpropertyOf
            | Self::SubcategoryOf
            | Self::Subobject
            | Self::Ask
            | Self::LastEditor => DataItemKind::WikiPage,
            Self::Concept => DataItemKind::Concept,
            Self::ModificationDate | Self::CreationDate => DataItemKind::Time,
            Self::NewPage => DataItemKind::Boolean,
        }
    }

    /// Whether the property gets a dedicated fixed table.
    #[must_use]
    pub const fn has_fixed_table(self) -> bool {
        !matches!(
            self,
            Self::Uri | Self::Unit | Self::Service | Self::AllowsValue
        )
    }

    /// Whether the fixed table records a subject ID. Only the redirect table
    /// is keyed by title instead.
    #[must_use]
    pub const fn uses_id_subject(self) -> bool {
        !matches!(self, Self::Redirect)
    }

    /// Namespace the property may be annotated in, if restricted.
    #[must_use]
    pub const fn namespace_restriction(self) -> Option<Namespace> {
        match self {
            Self::Type | Self::SubpropertyOf => Some(namespace::PROPERTY),
            Self::SubcategoryOf => Some(namespace::CATEGORY),
            Self::Concept => Some(namespace::CONCEPT),
            _ => None,
        }
    }

    /// Looks up a predefined property by key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.key() == key)
    }

    /// Looks up a predefined property by reserved ID.
    #[must_use]
    pub fn from_id(id: EntityId) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.reserved_id() == id)
    }
}

impl fmt::Display for PredefinedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^_?[^_#<>\[\]\|\{\}\s][^#<>\[\]\|\{\}\n\r\t]*$").expect("valid key pattern"))
}

/// A property, identified by its key.
///
/// # Examples
///
/// ```
/// use semstore::{PredefinedProperty, Property};
///
/// let population = Property::new("Has_population").unwrap();
/// assert!(population.is_user_defined());
///
/// let inst = Property::predefined(PredefinedProperty::Instance);
/// assert_eq!(inst.key(), "_INST");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Property {
    key: String,
    #[serde(default)]
    inverse: bool,
}

impl Property {
    /// Creates a property from its key.
    ///
    /// # Errors
    /// Returns [`ValidationError::MalformedPropertyKey`] for empty keys, keys
    /// with link syntax characters, and unknown `_`-prefixed keys.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        if !key_pattern().is_match(&key) {
            return Err(ValidationError::MalformedPropertyKey {
                key,
                reason: "not a valid property key".to_string(),
            });
        }
        if key.starts_with('_') && PredefinedProperty::from_key(&key).is_none() {
            return Err(ValidationError::MalformedPropertyKey {
                key,
                reason: "unknown predefined property".to_string(),
            });
        }
        Ok(Self { key, inverse: false })
    }

    /// Creates a predefined property.
    #[must_use]
    pub fn predefined(p: PredefinedProperty) -> Self {
        Self {
            key: p.key().to_string(),
            inverse: false,
        }
    }

    /// Returns the inverse of this property.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            key: self.key.clone(),
            inverse: !self.inverse,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub const fn is_inverse(&self) -> bool {
        self.inverse
    }

    #[must_use]
    pub fn is_user_defined(&self) -> bool {
        !self.key.starts_with('_')
    }

    #[must_use]
    pub fn as_predefined(&self) -> Option<PredefinedProperty> {
        PredefinedProperty::from_key(&self.key)
    }

    /// The entity key of the property's own page.
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(self.key.clone(), namespace::PROPERTY)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inverse {
            write!(f, "-{}", self.key)
        } else {
            write!(f, "{}", self.key)
        }
    }
}
