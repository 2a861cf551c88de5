//! Relationship graph: parent/child links between rows.

mod graph;

pub use graph::{RelatedRows, Relationship, RelationshipGraph};
