//! Decoded ID-table rows.

use std::collections::BTreeMap;

use crate::entity::{EntityId, EntityKey};
use crate::schema::field;
use crate::storage::{Row, StorageError};

/// Per-subject map from property table name to the hash of the subject's
/// rows in that table. Stored as JSON in `smw_proptable_hash`.
pub type TableHashes = BTreeMap<String, String>;

/// Columns read for an [`IdRecord`].
pub const RECORD_FIELDS: &[&str] = &[
    field::SMW_ID,
    field::SMW_TITLE,
    field::SMW_NAMESPACE,
    field::SMW_IW,
    field::SMW_SUBOBJECT,
    field::SMW_SORTKEY,
    field::SMW_HASH,
];

/// Columns read for an [`IdRecord`] including the table hashes.
pub const RECORD_FIELDS_WITH_HASHES: &[&str] = &[
    field::SMW_ID,
    field::SMW_TITLE,
    field::SMW_NAMESPACE,
    field::SMW_IW,
    field::SMW_SUBOBJECT,
    field::SMW_SORTKEY,
    field::SMW_HASH,
    field::SMW_PROPTABLE_HASH,
];

/// ID, sortkey and hashes of one entity, returned by value from lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRecord {
    pub id: EntityId,
    pub sortkey: String,
    /// Hash of the composite key as stored.
    pub hash: String,
    pub interwiki: String,
    /// `None` when hashes were not requested or never recorded.
    pub table_hashes: Option<TableHashes>,
}

impl IdRecord {
    /// Decodes a row selected with [`RECORD_FIELDS`] or
    /// [`RECORD_FIELDS_WITH_HASHES`].
    ///
    /// # Errors
    /// Returns [`StorageError::Corrupt`] for a missing ID or an unreadable
    /// hash map.
    pub fn from_row(row: &Row) -> Result<Self, StorageError> {
        let id = row
            .id(field::SMW_ID)?
            .ok_or_else(|| StorageError::Corrupt("id row without smw_id".to_string()))?;
        let table_hashes = match row.text(field::SMW_PROPTABLE_HASH) {
            Some(json) => Some(decode_table_hashes(json)?),
            None => None,
        };
        Ok(Self {
            id,
            sortkey: row.text(field::SMW_SORTKEY).unwrap_or_default().to_string(),
            hash: row.text(field::SMW_HASH).unwrap_or_default().to_string(),
            interwiki: row.text(field::SMW_IW).unwrap_or_default().to_string(),
            table_hashes,
        })
    }
}

/// Rebuilds the composite key stored in an ID-table row.
///
/// # Errors
/// Returns [`StorageError::Corrupt`] when the title or namespace is missing.
pub fn key_from_row(row: &Row) -> Result<EntityKey, StorageError> {
    let title = row
        .text(field::SMW_TITLE)
        .ok_or_else(|| StorageError::Corrupt("id row without smw_title".to_string()))?;
    let namespace = row
        .int(field::SMW_NAMESPACE)
        .and_then(|ns| i32::try_from(ns).ok())
        .ok_or_else(|| StorageError::Corrupt("id row without smw_namespace".to_string()))?;
    Ok(EntityKey::from_parts(
        title,
        namespace,
        row.text(field::SMW_IW).unwrap_or_default(),
        row.text(field::SMW_SUBOBJECT).unwrap_or_default(),
    ))
}

/// Key columns of an ID-table row, as equality conditions.
#[must_use]
pub fn key_conditions(key: &EntityKey) -> crate::storage::Conditions {
    crate::storage::Conditions::new()
        .eq(field::SMW_TITLE, key.title.as_str())
        .eq(field::SMW_NAMESPACE, key.namespace)
        .eq(field::SMW_IW, key.interwiki.as_str())
        .eq(field::SMW_SUBOBJECT, key.subobject.as_str())
}

pub(crate) fn encode_table_hashes(hashes: &TableHashes) -> Result<String, StorageError> {
    serde_json::to_string(hashes).map_err(|e| StorageError::SerializationError(e.to_string()))
}

pub(crate) fn decode_table_hashes(json: &str) -> Result<TableHashes, StorageError> {
    serde_json::from_str(json)
        .map_err(|e| StorageError::Corrupt(format!("unreadable smw_proptable_hash: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::namespace;

    #[test]
    fn test_record_from_row() {
        let mut hashes = TableHashes::new();
        hashes.insert("smw_di_blob".to_string(), "abc".to_string());
        let row = Row::new()
            .with(field::SMW_ID, EntityId::new(501))
            .with(field::SMW_SORTKEY, "Foo")
            .with(field::SMW_HASH, "h")
            .with(field::SMW_IW, "")
            .with(field::SMW_PROPTABLE_HASH, encode_table_hashes(&hashes).unwrap());

        let record = IdRecord::from_row(&row).unwrap();
        assert_eq!(record.id, EntityId::new(501));
        assert_eq!(record.table_hashes, Some(hashes));
    }

    #[test]
    fn test_missing_hash_map_is_none() {
        let row = Row::new().with(field::SMW_ID, EntityId::new(501));
        assert_eq!(IdRecord::from_row(&row).unwrap().table_hashes, None);
    }

    #[test]
    fn test_corrupt_hash_map() {
        let row = Row::new()
            .with(field::SMW_ID, EntityId::new(501))
            .with(field::SMW_PROPTABLE_HASH, "{broken");
        assert!(matches!(IdRecord::from_row(&row), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_key_round_trip_through_row() {
        let key = EntityKey::new("Foo", namespace::MAIN).with_subobject("s1");
        let row = Row::new()
            .with(field::SMW_TITLE, key.title.as_str())
            .with(field::SMW_NAMESPACE, key.namespace)
            .with(field::SMW_IW, "")
            .with(field::SMW_SUBOBJECT, "s1");
        assert_eq!(key_from_row(&row).unwrap(), key);
        assert!(key_conditions(&key).matches(&row));
    }
}
