//! Data items: the values a property can hold.
//!
//! Every data item has a [`DataItemKind`] that decides which property table
//! it lands in and how it is spread over that table's value columns.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::concept::ConceptDefinition;
use crate::entity::EntityKey;
use crate::schema::{field, DataItemKind};
use crate::storage::Cell;

/// Blob values up to this many bytes are stored inline in `o_hash`; longer
/// values go to `o_blob` and `o_hash` carries a digest.
pub const BLOB_INLINE_LIMIT: usize = 72;

/// A single property value.
///
/// # Examples
///
/// ```
/// use semstore::{DataItem, DataItemKind};
///
/// let n = DataItem::Number(3.5);
/// assert_eq!(n.kind(), DataItemKind::Number);
/// assert_eq!(n.serialization(), "3.5");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataItem {
    WikiPage(EntityKey),
    Number(f64),
    Blob(String),
    Boolean(bool),
    Uri(String),
    Time(DateTime<Utc>),
    GeoCoord {
        lat: f64,
        lon: f64,
    },
    Concept(ConceptDefinition),
}

impl DataItem {
    #[must_use]
    pub const fn kind(&self) -> DataItemKind {
        match self {
            Self::WikiPage(_) => DataItemKind::WikiPage,
            Self::Number(_) => DataItemKind::Number,
            Self::Blob(_) => DataItemKind::Blob,
            Self::Boolean(_) => DataItemKind::Boolean,
            Self::Uri(_) => DataItemKind::Uri,
            Self::Time(_) => DataItemKind::Time,
            Self::GeoCoord { .. } => DataItemKind::GeoCoord,
            Self::Concept(_) => DataItemKind::Concept,
        }
    }

    #[must_use]
    pub const fn as_page(&self) -> Option<&EntityKey> {
        match self {
            Self::WikiPage(key) => Some(key),
            _ => None,
        }
    }

    /// Canonical string form, used for `o_serialized` and value hashes.
    #[must_use]
    pub fn serialization(&self) -> String {
        match self {
            Self::WikiPage(key) => key.to_string(),
            Self::Number(v) => v.to_string(),
            Self::Blob(s) | Self::Uri(s) => s.clone(),
            Self::Boolean(v) => v.to_string(),
            Self::Time(t) => t.to_rfc3339(),
            Self::GeoCoord { lat, lon } => format!("{lat},{lon}"),
            Self::Concept(def) => def.description.to_string(),
        }
    }

    /// Stable digest of the value, used in sequence maps.
    #[must_use]
    pub fn value_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind().type_id().as_bytes());
        hasher.update(b":");
        hasher.update(self.serialization().as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Text to feed into the fulltext index, if any.
    #[must_use]
    pub fn search_text(&self) -> Option<&str> {
        match self {
            Self::Blob(s) | Self::Uri(s) => Some(s),
            _ => None,
        }
    }

    /// Value columns for every kind except wikipage references, whose object
    /// ID has to be resolved by the caller.
    ///
    /// Returns `None` for [`DataItem::WikiPage`].
    #[must_use]
    pub fn value_cells(&self) -> Option<Vec<(&'static str, Cell)>> {
        let cells = match self {
            Self::WikiPage(_) => return None,
            Self::Number(v) => vec![
                (field::O_SERIALIZED, Cell::from(self.serialization())),
                (field::O_SORTKEY, Cell::Float(*v)),
            ],
            Self::Time(t) => {
                #[allow(clippy::cast_precision_loss)]
                let sortkey = t.timestamp_millis() as f64 / 1000.0;
                vec![
                    (field::O_SERIALIZED, Cell::from(self.serialization())),
                    (field::O_SORTKEY, Cell::Float(sortkey)),
                ]
            }
            Self::Blob(s) => {
                if s.len() <= BLOB_INLINE_LIMIT {
                    vec![(field::O_BLOB, Cell::Null), (field::O_HASH, Cell::from(s.as_str()))]
                } else {
                    vec![
                        (field::O_BLOB, Cell::from(s.as_str())),
                        (field::O_HASH, Cell::from(blake3::hash(s.as_bytes()).to_hex().to_string())),
                    ]
                }
            }
            Self::Boolean(v) => vec![(field::O_VALUE, Cell::Bool(*v))],
            Self::Uri(s) => {
                let blob = if s.len() > BLOB_INLINE_LIMIT {
                    Cell::from(s.as_str())
                } else {
                    Cell::Null
                };
                vec![(field::O_SERIALIZED, Cell::from(s.as_str())), (field::O_BLOB, blob)]
            }
            Self::GeoCoord { lat, lon } => vec![
                (field::O_SERIALIZED, Cell::from(self.serialization())),
                (field::O_LAT, Cell::Float(*lat)),
                (field::O_LON, Cell::Float(*lon)),
            ],
            Self::Concept(def) => {
                let text = serde_json::to_string(&def.description).unwrap_or_default();
                vec![
                    (field::CONCEPT_TXT, Cell::Text(text)),
                    (field::CONCEPT_DOCU, Cell::from(def.documentation.as_str())),
                    (field::CONCEPT_FEATURES, Cell::from(i64::from(def.description.features()))),
                    (field::CONCEPT_SIZE, Cell::from(i64::from(def.description.size()))),
                    (field::CONCEPT_DEPTH, Cell::from(i64::from(def.description.depth()))),
                ]
            }
        };
        Some(cells)
    }
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialization())
    }
}

impl From<EntityKey> for DataItem {
    fn from(key: EntityKey) -> Self {
        Self::WikiPage(key)
    }
}

impl From<f64> for DataItem {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for DataItem {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for DataItem {
    fn from(v: &str) -> Self {
        Self::Blob(v.to_string())
    }
}

impl From<String> for DataItem {
    fn from(v: String) -> Self {
        Self::Blob(v)
    }
}

impl From<DateTime<Utc>> for DataItem {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(t)
    }
}
