//! Semantic data: everything asserted about one subject in one update.

use std::collections::BTreeMap;

use crate::entity::EntityKey;
use crate::error::ValidationError;
use crate::property::Property;
use crate::value::DataItem;

/// A subject plus its property/value multimap and subobjects.
///
/// Values are kept in insertion order per property; adding a value that is
/// already present is a no-op.
///
/// # Examples
///
/// ```
/// use semstore::{DataItem, Property, SemanticData};
/// use semstore::entity::{namespace, EntityKey};
///
/// let mut data = SemanticData::new(EntityKey::new("Berlin", namespace::MAIN));
/// let population = Property::new("Has_population").unwrap();
/// data.add_value(population.clone(), DataItem::Number(3_645_000.0));
/// data.add_value(population.clone(), DataItem::Number(3_645_000.0));
/// assert_eq!(data.values(&population).len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticData {
    subject: EntityKey,
    properties: BTreeMap<Property, Vec<DataItem>>,
    subobjects: BTreeMap<String, SemanticData>,
    sortkey: Option<String>,
    redirect_target: Option<EntityKey>,
}

impl SemanticData {
    #[must_use]
    pub fn new(subject: EntityKey) -> Self {
        Self {
            subject,
            properties: BTreeMap::new(),
            subobjects: BTreeMap::new(),
            sortkey: None,
            redirect_target: None,
        }
    }

    #[must_use]
    pub const fn subject(&self) -> &EntityKey {
        &self.subject
    }

    /// Adds a value unless an equal value is already recorded.
    pub fn add_value(&mut self, property: Property, value: DataItem) {
        let values = self.properties.entry(property).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Builder-style [`SemanticData::add_value`].
    #[must_use]
    pub fn with_value(mut self, property: Property, value: impl Into<DataItem>) -> Self {
        self.add_value(property, value.into());
        self
    }

    /// Removes a property with all its values.
    pub fn remove_property(&mut self, property: &Property) -> Option<Vec<DataItem>> {
        self.properties.remove(property)
    }

    #[must_use]
    pub fn values(&self, property: &Property) -> &[DataItem] {
        self.properties.get(property).map_or(&[], Vec::as_slice)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&Property, &[DataItem])> {
        self.properties.iter().map(|(p, v)| (p, v.as_slice()))
    }

    /// Attaches a subobject. Data for an already attached subobject is merged.
    ///
    /// # Errors
    /// Returns [`ValidationError::ForeignSubobject`] when the subobject's key
    /// does not name a subobject of this subject.
    pub fn add_subobject(&mut self, subobject: SemanticData) -> Result<(), ValidationError> {
        let key = subobject.subject();
        if !key.is_subobject() || key.page() != self.subject || self.subject.is_subobject() {
            return Err(ValidationError::ForeignSubobject {
                subject: self.subject.to_string(),
                subobject: key.to_string(),
            });
        }
        match self.subobjects.get_mut(&key.subobject) {
            Some(existing) => {
                for (property, values) in subobject.properties {
                    for value in values {
                        existing.add_value(property.clone(), value);
                    }
                }
            }
            None => {
                self.subobjects.insert(key.subobject.clone(), subobject);
            }
        }
        Ok(())
    }

    pub fn subobjects(&self) -> impl Iterator<Item = &SemanticData> {
        self.subobjects.values()
    }

    pub fn set_sortkey(&mut self, sortkey: impl Into<String>) {
        self.sortkey = Some(sortkey.into());
    }

    /// The explicit sortkey, or the subject's default one.
    #[must_use]
    pub fn sortkey(&self) -> String {
        self.sortkey
            .clone()
            .unwrap_or_else(|| self.subject.default_sortkey())
    }

    /// Declares the subject a redirect to `target`.
    pub fn set_redirect(&mut self, target: EntityKey) {
        self.redirect_target = Some(target);
    }

    #[must_use]
    pub const fn redirect_target(&self) -> Option<&EntityKey> {
        self.redirect_target.as_ref()
    }

    /// True when no property carries a value and there are no subobjects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.values().all(Vec::is_empty) && self.subobjects.is_empty()
    }

    #[must_use]
    pub fn property_count(&self) -> usize {
        self.properties.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::namespace;

    fn berlin() -> EntityKey {
        EntityKey::new("Berlin", namespace::MAIN)
    }

    #[test]
    fn test_values_keep_insertion_order() {
        let p = Property::new("Has_district").unwrap();
        let data = SemanticData::new(berlin())
            .with_value(p.clone(), "Mitte")
            .with_value(p.clone(), "Pankow")
            .with_value(p.clone(), "Mitte");
        assert_eq!(
            data.values(&p),
            &[DataItem::Blob("Mitte".into()), DataItem::Blob("Pankow".into())]
        );
    }

    #[test]
    fn test_subobject_must_belong_to_subject() {
        let mut data = SemanticData::new(berlin());
        let own = SemanticData::new(berlin().with_subobject("census"));
        assert!(data.add_subobject(own).is_ok());

        let foreign = SemanticData::new(EntityKey::new("Paris", 0).with_subobject("census"));
        assert!(matches!(
            data.add_subobject(foreign),
            Err(ValidationError::ForeignSubobject { .. })
        ));

        let not_a_subobject = SemanticData::new(berlin());
        assert!(data.add_subobject(not_a_subobject).is_err());
    }

    #[test]
    fn test_subobject_data_is_merged() {
        let p = Property::new("Has_year").unwrap();
        let mut data = SemanticData::new(berlin());
        data.add_subobject(SemanticData::new(berlin().with_subobject("c")).with_value(p.clone(), 2011.0))
            .unwrap();
        data.add_subobject(SemanticData::new(berlin().with_subobject("c")).with_value(p.clone(), 2022.0))
            .unwrap();
        let sub = data.subobjects().next().unwrap();
        assert_eq!(sub.values(&p).len(), 2);
    }

    #[test]
    fn test_sortkey_defaults_to_title() {
        let mut data = SemanticData::new(EntityKey::new("New_York", 0));
        assert_eq!(data.sortkey(), "New York");
        data.set_sortkey("York, New");
        assert_eq!(data.sortkey(), "York, New");
    }

    #[test]
    fn test_empty() {
        let data = SemanticData::new(berlin());
        assert!(data.is_empty());
        assert!(!data.with_value(Property::new("P").unwrap(), true).is_empty());
    }
}
