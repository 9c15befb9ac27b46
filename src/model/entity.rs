//! Read-side views assembled by the entity reader.
//!
//! These are what a client sees: one entity with its property values (each
//! tagged with the id of the shared Property node that holds it) and its
//! attribute targets, either bare ids or hydrated one level deep.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{NodeId, Value};

/// An attribute link hanging off a property link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttrRef {
    #[serde(rename = "type")]
    pub attr_type: String,
    pub aid: NodeId,
}

/// One value of one property kind, as held by an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyEntry {
    /// Id of the (shared) Property node.
    pub pid: NodeId,
    pub value: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<AttrRef>,
}

/// An attribute target expanded into its own property values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydratedAttribute {
    pub id: NodeId,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Vec<Value>>,
}

/// Targets of one attribute kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeEntries {
    Ids(Vec<NodeId>),
    Hydrated(Vec<HydratedAttribute>),
}

impl AttributeEntries {
    pub fn ids(&self) -> Vec<NodeId> {
        match self {
            AttributeEntries::Ids(ids) => ids.clone(),
            AttributeEntries::Hydrated(items) => items.iter().map(|a| a.id).collect(),
        }
    }
}

/// Property/attribute view of one entity.
///
/// Kinds with no data are absent from the maps, never present-but-empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityView {
    pub id: NodeId,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Vec<PropertyEntry>>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, AttributeEntries>,
}

impl EntityView {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            properties: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Property entries of one kind, if any.
    pub fn property(&self, kind: &str) -> Option<&[PropertyEntry]> {
        self.properties.get(kind).map(Vec::as_slice)
    }

    /// Bare values of one property kind.
    pub fn values(&self, kind: &str) -> Vec<&Value> {
        self.property(kind)
            .map(|entries| entries.iter().map(|e| &e.value).collect())
            .unwrap_or_default()
    }

    pub fn attribute(&self, kind: &str) -> Option<&AttributeEntries> {
        self.attributes.get(kind)
    }
}

/// A property value paired with the entity holding it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeldValue {
    pub value: Value,
    pub id: NodeId,
}
