//! Concepts: stored query definitions and their cached member lists.

mod cache;
mod description;
mod segment;

pub use cache::{ConceptCache, ConceptStatus};
pub use description::{
    ConceptDefinition, ConceptDescription, FEATURE_CATEGORY, FEATURE_CONJUNCTION, FEATURE_DISJUNCTION,
    FEATURE_NAMESPACE, FEATURE_PROPERTY,
};
pub use segment::QuerySegmentBuilder;
