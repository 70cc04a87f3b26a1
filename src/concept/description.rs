//! Concept query descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::Namespace;
use crate::value::DataItem;

/// Feature bit for property conditions.
pub const FEATURE_PROPERTY: u32 = 1;
/// Feature bit for category conditions.
pub const FEATURE_CATEGORY: u32 = 2;
/// Feature bit for namespace conditions.
pub const FEATURE_NAMESPACE: u32 = 8;
/// Feature bit for conjunctions.
pub const FEATURE_CONJUNCTION: u32 = 16;
/// Feature bit for disjunctions.
pub const FEATURE_DISJUNCTION: u32 = 32;

/// A query over the property tables.
///
/// # Examples
///
/// ```
/// use semstore::concept::ConceptDescription;
///
/// let d = ConceptDescription::Conjunction(vec![
///     ConceptDescription::Category("City".into()),
///     ConceptDescription::HasProperty("Population".into()),
/// ]);
/// assert_eq!(d.to_string(), "[[Category:City]][[Population::+]]");
/// assert_eq!(d.size(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum ConceptDescription {
    /// Members of a category or any of its subcategories.
    Category(String),
    /// Subjects with at least one value for a property.
    HasProperty(String),
    /// Subjects with a specific value for a property.
    PropertyValue {
        property: String,
        value: Box<DataItem>,
    },
    /// Pages in a namespace.
    Namespace(Namespace),
    Conjunction(Vec<ConceptDescription>),
    Disjunction(Vec<ConceptDescription>),
}

impl ConceptDescription {
    /// Bitwise union of the features used anywhere in the description.
    #[must_use]
    pub fn features(&self) -> u32 {
        match self {
            Self::Category(_) => FEATURE_CATEGORY,
            Self::HasProperty(_) | Self::PropertyValue { .. } => FEATURE_PROPERTY,
            Self::Namespace(_) => FEATURE_NAMESPACE,
            Self::Conjunction(parts) => parts.iter().fold(FEATURE_CONJUNCTION, |f, p| f | p.features()),
            Self::Disjunction(parts) => parts.iter().fold(FEATURE_DISJUNCTION, |f, p| f | p.features()),
        }
    }

    /// Number of leaf conditions.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            Self::Conjunction(parts) | Self::Disjunction(parts) => parts.iter().map(Self::size).sum(),
            _ => 1,
        }
    }

    /// Property nesting depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        match self {
            Self::HasProperty(_) | Self::PropertyValue { .. } => 1,
            Self::Conjunction(parts) | Self::Disjunction(parts) => {
                parts.iter().map(Self::depth).max().unwrap_or(0)
            }
            Self::Category(_) | Self::Namespace(_) => 0,
        }
    }
}

impl fmt::Display for ConceptDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(name) => write!(f, "[[Category:{name}]]"),
            Self::HasProperty(property) => write!(f, "[[{property}::+]]"),
            Self::PropertyValue { property, value } => write!(f, "[[{property}::{value}]]"),
            Self::Namespace(ns) => write!(f, "[[:{ns}]]"),
            Self::Conjunction(parts) => {
                for part in parts {
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Self::Disjunction(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "<q>{part}</q>")?;
                }
                Ok(())
            }
        }
    }
}

/// Stored definition of a concept page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDefinition {
    pub description: ConceptDescription,
    #[serde(default)]
    pub documentation: String,
}

impl ConceptDefinition {
    #[must_use]
    pub fn new(description: ConceptDescription) -> Self {
        Self {
            description,
            documentation: String::new(),
        }
    }

    #[must_use]
    pub fn with_documentation(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = documentation.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConceptDescription {
        ConceptDescription::Disjunction(vec![
            ConceptDescription::Category("City".into()),
            ConceptDescription::Conjunction(vec![
                ConceptDescription::Namespace(0),
                ConceptDescription::PropertyValue {
                    property: "Located_in".into(),
                    value: Box::new(DataItem::Number(3.0)),
                },
            ]),
        ])
    }

    #[test]
    fn test_metrics() {
        let d = sample();
        assert_eq!(d.size(), 3);
        assert_eq!(d.depth(), 1);
        assert_eq!(
            d.features(),
            FEATURE_DISJUNCTION | FEATURE_CATEGORY | FEATURE_CONJUNCTION | FEATURE_NAMESPACE | FEATURE_PROPERTY
        );
    }

    #[test]
    fn test_ask_syntax() {
        assert_eq!(
            sample().to_string(),
            "<q>[[Category:City]]</q> OR <q>[[:0]][[Located_in::3]]</q>"
        );
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&ConceptDescription::Category("City".into())).unwrap();
        assert_eq!(json, r#"{"op":"category","args":"City"}"#);
        let back: ConceptDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConceptDescription::Category("City".into()));
    }
}
