//! Data-item kinds and their static column layouts.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::field;

/// Closed set of value kinds a property table can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataItemKind {
    /// Reference to another entity.
    WikiPage,
    Number,
    /// Free text.
    Blob,
    Boolean,
    Uri,
    Time,
    GeoCoord,
    /// Concept definition (only stored in the fixed concept table).
    Concept,
}

impl DataItemKind {
    /// Every kind, in table-creation order.
    pub const ALL: [Self; 8] = [
        Self::WikiPage,
        Self::Number,
        Self::Blob,
        Self::Boolean,
        Self::Uri,
        Self::Time,
        Self::GeoCoord,
        Self::Concept,
    ];

    /// Value columns written by the row mapper, in layout order.
    #[must_use]
    pub const fn value_fields(self) -> &'static [&'static str] {
        match self {
            Self::WikiPage => &[field::O_ID],
            Self::Number | Self::Time => &[field::O_SERIALIZED, field::O_SORTKEY],
            Self::Blob => &[field::O_BLOB, field::O_HASH],
            Self::Boolean => &[field::O_VALUE],
            Self::Uri => &[field::O_SERIALIZED, field::O_BLOB],
            Self::GeoCoord => &[field::O_SERIALIZED, field::O_LAT, field::O_LON],
            Self::Concept => &[
                field::CONCEPT_TXT,
                field::CONCEPT_DOCU,
                field::CONCEPT_FEATURES,
                field::CONCEPT_SIZE,
                field::CONCEPT_DEPTH,
            ],
        }
    }

    /// Extra columns maintained outside the diff (never compared).
    #[must_use]
    pub const fn status_fields(self) -> &'static [&'static str] {
        match self {
            Self::Concept => &[field::CACHE_DATE, field::CACHE_COUNT],
            _ => &[],
        }
    }

    /// Value columns that hold surrogate IDs.
    #[must_use]
    pub const fn id_value_fields(self) -> &'static [&'static str] {
        match self {
            Self::WikiPage => &[field::O_ID],
            _ => &[],
        }
    }

    /// Shared table for properties of this kind without a fixed table.
    #[must_use]
    pub const fn generic_table_name(self) -> Option<&'static str> {
        match self {
            Self::WikiPage => Some("smw_di_wikipage"),
            Self::Number => Some("smw_di_number"),
            Self::Blob => Some("smw_di_blob"),
            Self::Boolean => Some("smw_di_bool"),
            Self::Uri => Some("smw_di_uri"),
            Self::Time => Some("smw_di_time"),
            Self::GeoCoord => Some("smw_di_coords"),
            Self::Concept => None,
        }
    }

    /// Short type identifier.
    #[must_use]
    pub const fn type_id(self) -> &'static str {
        match self {
            Self::WikiPage => "_wpg",
            Self::Number => "_num",
            Self::Blob => "_txt",
            Self::Boolean => "_boo",
            Self::Uri => "_uri",
            Self::Time => "_dat",
            Self::GeoCoord => "_geo",
            Self::Concept => "__con",
        }
    }
}

impl fmt::Display for DataItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_value_fields() {
        for kind in DataItemKind::ALL {
            assert!(!kind.value_fields().is_empty(), "{kind} has no value fields");
        }
    }

    #[test]
    fn test_only_concept_lacks_generic_table() {
        for kind in DataItemKind::ALL {
            assert_eq!(kind.generic_table_name().is_none(), kind == DataItemKind::Concept);
        }
    }

    #[test]
    fn test_status_fields_are_disjoint_from_value_fields() {
        for kind in DataItemKind::ALL {
            for status in kind.status_fields() {
                assert!(!kind.value_fields().contains(status));
            }
        }
    }
}
