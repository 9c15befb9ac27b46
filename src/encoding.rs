//! # Graph encoding
//!
//! How entities, properties and attributes sit in the property graph:
//!
//! ```text
//! (n)-[:HAS]->(:Link:Prop)-[:IS]->(:Property:<kind> {value})
//! (n)-[:HAS]->(:Link:Attr {type})-[:IS]->(a:Attribute)
//! (:Link:Prop)-[:HAS]->(:Link:Attr {type})-[:IS]->(a)
//! ```
//!
//! Property nodes are shared by every owner holding the same (kind, value)
//! and are collected once their last link is gone. Link bodies are owned by
//! exactly one owner and die with the edge they stand for.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::*;
use crate::schema::{labels, rels, TYPE_KEY, VALUE_KEY};
use crate::storage::StorageBackend;
use crate::{Error, Result};

/// An owner's link to one Property node.
#[derive(Debug, Clone)]
pub struct PropLink {
    pub link: NodeId,
    pub property: Node,
}

impl PropLink {
    pub fn kind(&self) -> Option<&str> {
        property_kind(&self.property)
    }

    pub fn value(&self) -> Value {
        self.property.get(VALUE_KEY).cloned().unwrap_or(Value::Null)
    }
}

/// An owner's link to one attribute target.
#[derive(Debug, Clone)]
pub struct AttrLink {
    pub link: NodeId,
    pub attr_type: String,
    pub target: NodeId,
}

/// Result of linking an owner to a (kind, value) Property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkedProperty {
    pub pid: NodeId,
    pub link: NodeId,
    pub created_property: bool,
    pub created_link: bool,
}

/// The property kind of a Property node: its first label other than `Property`.
pub fn property_kind(node: &Node) -> Option<&str> {
    node.labels
        .iter()
        .map(String::as_str)
        .find(|l| *l != labels::PROPERTY)
}

pub fn is_prop_link(node: &Node) -> bool {
    node.has_labels(&[labels::LINK, labels::PROP])
}

pub fn is_attr_link(node: &Node) -> bool {
    node.has_labels(&[labels::LINK, labels::ATTR])
}

pub async fn require_node<B: StorageBackend>(backend: &B, tx: &B::Tx, id: NodeId) -> Result<Node> {
    backend
        .get_node(tx, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("node {id}")))
}

/// Link bodies reached from `owner` through outgoing `HAS`, filtered.
async fn link_bodies<B: StorageBackend>(
    backend: &B,
    tx: &B::Tx,
    owner: NodeId,
    keep: fn(&Node) -> bool,
) -> Result<Vec<Node>> {
    let mut bodies = Vec::new();
    for rel in backend.get_relationships(tx, owner, Direction::Outgoing, Some(rels::HAS)).await? {
        if let Some(body) = backend.get_node(tx, rel.dst).await? {
            if keep(&body) {
                bodies.push(body);
            }
        }
    }
    Ok(bodies)
}

/// Targets a link body points at through outgoing `IS`.
async fn link_targets<B: StorageBackend>(backend: &B, tx: &B::Tx, link: NodeId) -> Result<Vec<NodeId>> {
    Ok(backend
        .get_relationships(tx, link, Direction::Outgoing, Some(rels::IS))
        .await?
        .into_iter()
        .map(|r| r.dst)
        .collect())
}

/// Every Property link of `owner`.
pub async fn prop_links<B: StorageBackend>(backend: &B, tx: &B::Tx, owner: NodeId) -> Result<Vec<PropLink>> {
    let mut out = Vec::new();
    for body in link_bodies(backend, tx, owner, is_prop_link).await? {
        for target in link_targets(backend, tx, body.id).await? {
            if let Some(property) = backend.get_node(tx, target).await? {
                if property.has_label(labels::PROPERTY) {
                    out.push(PropLink { link: body.id, property });
                }
            }
        }
    }
    Ok(out)
}

/// Every attribute link of `owner` (an entity or a property link).
pub async fn attr_links<B: StorageBackend>(backend: &B, tx: &B::Tx, owner: NodeId) -> Result<Vec<AttrLink>> {
    let mut out = Vec::new();
    for body in link_bodies(backend, tx, owner, is_attr_link).await? {
        let attr_type = body
            .get(TYPE_KEY)
            .map(Value::to_text)
            .unwrap_or_default();
        for target in link_targets(backend, tx, body.id).await? {
            out.push(AttrLink { link: body.id, attr_type: attr_type.clone(), target });
        }
    }
    Ok(out)
}

/// Property values of `owner`, grouped by kind, optionally restricted.
pub async fn property_entries<B: StorageBackend>(
    backend: &B,
    tx: &B::Tx,
    owner: NodeId,
    kinds: Option<&[String]>,
) -> Result<BTreeMap<String, Vec<PropertyEntry>>> {
    let mut grouped: BTreeMap<String, Vec<PropertyEntry>> = BTreeMap::new();
    for link in prop_links(backend, tx, owner).await? {
        let Some(kind) = link.kind() else { continue };
        if kinds.is_some_and(|ks| !ks.iter().any(|k| k == kind)) {
            continue;
        }
        let attrs = attr_links(backend, tx, link.link)
            .await?
            .into_iter()
            .map(|a| AttrRef { attr_type: a.attr_type, aid: a.target })
            .collect();
        grouped.entry(kind.to_string()).or_default().push(PropertyEntry {
            pid: link.property.id,
            value: link.value(),
            attrs,
        });
    }
    for entries in grouped.values_mut() {
        entries.sort_by(|a, b| a.value.total_cmp(&b.value).then(a.pid.cmp(&b.pid)));
        entries.dedup_by(|a, b| a.pid == b.pid);
    }
    Ok(grouped)
}

/// Bare property values of `owner` by kind, for one-level hydration.
pub async fn property_values<B: StorageBackend>(
    backend: &B,
    tx: &B::Tx,
    owner: NodeId,
) -> Result<BTreeMap<String, Vec<Value>>> {
    Ok(property_entries(backend, tx, owner, None)
        .await?
        .into_iter()
        .map(|(kind, entries)| (kind, entries.into_iter().map(|e| e.value).collect()))
        .collect())
}

/// Link `owner` to the shared Property node for (kind, value).
///
/// An existing link to that value is reused. Otherwise a fresh `Link:Prop`
/// body is hung off `owner` and the Property is merged and linked to it in
/// one atomic step.
pub async fn merge_prop_link<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    owner: NodeId,
    kind: &str,
    value: &Value,
) -> Result<LinkedProperty> {
    if let Some(existing) = prop_links(backend, &*tx, owner)
        .await?
        .into_iter()
        .find(|l| l.kind() == Some(kind) && l.property.get(VALUE_KEY) == Some(value))
    {
        return Ok(LinkedProperty {
            pid: existing.property.id,
            link: existing.link,
            created_property: false,
            created_link: false,
        });
    }

    let link = backend
        .create_node(tx, &[labels::LINK, labels::PROP], PropertyMap::new())
        .await?;
    backend.create_relationship(tx, owner, link, rels::HAS, PropertyMap::new()).await?;
    let merged = backend
        .merge_linked(tx, link, rels::IS, &[labels::PROPERTY, kind], VALUE_KEY, value)
        .await?;
    debug!(owner = %owner, kind, pid = %merged.id, link = %link, created = merged.created, "property linked");

    Ok(LinkedProperty {
        pid: merged.id,
        link,
        created_property: merged.created,
        created_link: true,
    })
}

/// Link `owner` to `target` through a typed attribute link, reusing one
/// that already joins the two with the same type.
pub async fn merge_attr_link<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    owner: NodeId,
    target: NodeId,
    attr_type: &str,
) -> Result<NodeId> {
    if let Some(existing) = attr_links(backend, &*tx, owner)
        .await?
        .into_iter()
        .find(|a| a.target == target && a.attr_type == attr_type)
    {
        return Ok(existing.link);
    }

    let link = backend
        .create_node(tx, &[labels::LINK, labels::ATTR], props([(TYPE_KEY, attr_type)]))
        .await?;
    backend.create_relationship(tx, owner, link, rels::HAS, PropertyMap::new()).await?;
    backend.create_relationship(tx, link, target, rels::IS, PropertyMap::new()).await?;
    debug!(owner = %owner, target = %target, attr_type, link = %link, "attribute linked");
    Ok(link)
}

/// Remove a link body together with the attribute links hanging off it.
///
/// Only `Link:Attr` bodies reached through `HAS` go with it; whatever the
/// link points at through `IS` is left alone, even a `Link`-labelled node.
pub async fn remove_link<B: StorageBackend>(backend: &B, tx: &mut B::Tx, link: NodeId) -> Result<()> {
    for child in link_bodies(backend, &*tx, link, is_attr_link).await? {
        backend.detach_delete_node(tx, child.id).await?;
        debug!(link = %child.id, parent = %link, "nested link removed");
    }
    backend.detach_delete_node(tx, link).await?;
    debug!(link = %link, "link removed");
    Ok(())
}

/// Delete the Property `node` if nothing references it any more.
pub async fn collect_if_orphan<B: StorageBackend>(backend: &B, tx: &mut B::Tx, node: NodeId) -> Result<bool> {
    let removed = backend.delete_orphan(tx, node, VALUE_KEY).await?;
    if removed {
        debug!(node = %node, "orphaned property collected");
    }
    Ok(removed)
}

/// Drop a property link and collect its Property if it is now orphaned.
pub async fn unlink_property<B: StorageBackend>(backend: &B, tx: &mut B::Tx, link: &PropLink) -> Result<bool> {
    remove_link(backend, tx, link.link).await?;
    collect_if_orphan(backend, tx, link.property.id).await
}
