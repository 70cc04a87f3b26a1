//! Property table definitions.

use crate::entity::Namespace;
use crate::storage::TableSchema;

use super::field;
use super::DataItemKind;

/// Layout of a single property table.
///
/// Generic tables hold every non-fixed property of one kind and carry a
/// `p_id` column; fixed tables hold exactly one property and omit it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyTableDefinition {
    name: String,
    kind: DataItemKind,
    fixed_property: Option<String>,
    uses_id_subject: bool,
    namespace_restriction: Option<Namespace>,
}

impl PropertyTableDefinition {
    /// Shared table for a kind.
    #[must_use]
    pub fn generic(name: impl Into<String>, kind: DataItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            fixed_property: None,
            uses_id_subject: true,
            namespace_restriction: None,
        }
    }

    /// Dedicated table for one property.
    #[must_use]
    pub fn fixed(name: impl Into<String>, kind: DataItemKind, property_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            fixed_property: Some(property_key.into()),
            uses_id_subject: true,
            namespace_restriction: None,
        }
    }

    /// Marks the table as keyed by subject title instead of subject ID.
    #[must_use]
    pub fn without_id_subject(mut self) -> Self {
        self.uses_id_subject = false;
        self
    }

    #[must_use]
    pub fn restricted_to(mut self, namespace: Option<Namespace>) -> Self {
        self.namespace_restriction = namespace;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> DataItemKind {
        self.kind
    }

    #[must_use]
    pub fn fixed_property(&self) -> Option<&str> {
        self.fixed_property.as_deref()
    }

    #[must_use]
    pub const fn is_fixed(&self) -> bool {
        self.fixed_property.is_some()
    }

    #[must_use]
    pub const fn uses_id_subject(&self) -> bool {
        self.uses_id_subject
    }

    #[must_use]
    pub const fn namespace_restriction(&self) -> Option<Namespace> {
        self.namespace_restriction
    }

    /// Whether rows for a subject in `namespace` may live in this table.
    #[must_use]
    pub fn is_relevant_for(&self, namespace: Namespace) -> bool {
        self.uses_id_subject && self.namespace_restriction.map_or(true, |ns| ns == namespace)
    }

    /// Columns compared by the row differ, in layout order.
    #[must_use]
    pub fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.uses_id_subject {
            fields.push(field::S_ID);
        } else {
            fields.push(field::S_TITLE);
            fields.push(field::S_NAMESPACE);
        }
        if !self.is_fixed() {
            fields.push(field::P_ID);
        }
        fields.extend_from_slice(self.kind.value_fields());
        fields
    }

    /// Columns holding surrogate IDs (subject, property and object).
    #[must_use]
    pub fn id_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.uses_id_subject {
            fields.push(field::S_ID);
        }
        if !self.is_fixed() {
            fields.push(field::P_ID);
        }
        fields.extend_from_slice(self.kind.id_value_fields());
        fields
    }

    /// Physical table description.
    #[must_use]
    pub fn schema(&self) -> TableSchema {
        let mut fields = self.fields();
        fields.extend_from_slice(self.kind.status_fields());
        let schema = TableSchema::new(self.name.clone(), &fields);
        if self.uses_id_subject {
            schema
        } else {
            schema.unique(&[field::S_TITLE, field::S_NAMESPACE])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_table_has_property_column() {
        let def = PropertyTableDefinition::generic("smw_di_blob", DataItemKind::Blob);
        assert_eq!(def.fields(), vec!["s_id", "p_id", "o_blob", "o_hash"]);
        assert_eq!(def.id_fields(), vec!["s_id", "p_id"]);
    }

    #[test]
    fn test_fixed_table_omits_property_column() {
        let def = PropertyTableDefinition::fixed("smw_fpt_inst", DataItemKind::WikiPage, "_INST");
        assert_eq!(def.fields(), vec!["s_id", "o_id"]);
        assert_eq!(def.id_fields(), vec!["s_id", "o_id"]);
        assert!(def.is_fixed());
    }

    #[test]
    fn test_subject_less_table() {
        let def = PropertyTableDefinition::fixed("smw_fpt_redi", DataItemKind::WikiPage, "_REDI")
            .without_id_subject();
        assert_eq!(def.fields(), vec!["s_title", "s_namespace", "o_id"]);
        assert!(!def.is_relevant_for(0));
        assert_eq!(def.schema().unique.len(), 1);
    }

    #[test]
    fn test_namespace_restriction() {
        let def = PropertyTableDefinition::fixed("smw_fpt_conc", DataItemKind::Concept, "_CONC")
            .restricted_to(Some(108));
        assert!(def.is_relevant_for(108));
        assert!(!def.is_relevant_for(0));
        assert!(def.schema().fields.contains(&"cache_date"));
        assert!(!def.fields().contains(&"cache_date"));
    }
}
