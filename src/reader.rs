//! # Entity Reader
//!
//! Discovery (labels, kinds, value catalogs) and the property/attribute
//! views of one entity or of every entity carrying a label.
//!
//! Every call runs in its own `ReadOnly` transaction. Follow-up reads
//! (per attribute kind, per hydrated target) are issued one after another.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::GraphConfig;
use crate::encoding::{self, is_attr_link, require_node};
use crate::model::*;
use crate::schema::{self, hierarchy, labels, LabelHierarchy, TYPE_KEY};
use crate::storage::StorageBackend;
use crate::tx::{finish, TxMode};
use crate::{Error, Result};

/// Expands to every kind known for the label or entity.
pub const WILDCARD: &str = "*";

/// Read-side component, borrowed from a `Graph`.
pub struct EntityReader<'g, B: StorageBackend> {
    backend: &'g B,
    config: &'g GraphConfig,
}

impl<'g, B: StorageBackend> EntityReader<'g, B> {
    pub fn new(backend: &'g B, config: &'g GraphConfig) -> Self {
        Self { backend, config }
    }

    // ========================================================================
    // Label discovery
    // ========================================================================

    /// Every label present in the graph, sorted.
    pub async fn list_labels(&self) -> Result<Vec<String>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.labels(&tx).await.map(|mut labels| {
            labels.sort();
            labels
        });
        finish(self.backend, tx, outcome).await
    }

    /// Type hierarchy inferred from label co-occurrence over every node,
    /// encoding nodes included.
    pub async fn label_hierarchy(&self) -> Result<LabelHierarchy> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.all_nodes(&tx).await.map(|nodes| {
            let (counts, sets) = hierarchy::label_statistics(nodes.iter().map(|n| n.labels.as_slice()));
            schema::infer_hierarchy(&counts, &sets)
        });
        finish(self.backend, tx, outcome).await
    }

    /// Labels of one node, sorted.
    pub async fn labels_of(&self, id: NodeId) -> Result<Vec<String>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = require_node(self.backend, &tx, id).await.map(|node| {
            let mut labels = node.labels;
            labels.sort();
            labels.dedup();
            labels
        });
        finish(self.backend, tx, outcome).await
    }

    /// Labels that appear together with `label` on some node, itself included.
    pub async fn co_labels(&self, label: &str) -> Result<Vec<String>> {
        self.check_name(label)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.nodes_by_label(&tx, label).await.map(|nodes| {
            nodes
                .into_iter()
                .flat_map(|n| n.labels)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        });
        finish(self.backend, tx, outcome).await
    }

    // ========================================================================
    // Kind discovery
    // ========================================================================

    /// Property kinds held by any node carrying `label`.
    pub async fn property_kinds(&self, label: &str) -> Result<Vec<String>> {
        self.check_name(label)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.property_kinds_in(&tx, label).await;
        finish(self.backend, tx, outcome).await
    }

    /// Attribute kinds reachable from nodes carrying `label`: the labels of
    /// attribute targets, marker labels removed.
    pub async fn attribute_kinds(&self, label: &str) -> Result<Vec<String>> {
        self.check_name(label)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome: Result<Vec<String>> = async {
            let owners = self.backend.nodes_by_label(&tx, label).await?;
            self.attribute_kinds_in(&tx, owners.iter().map(|n| n.id)).await
        }
        .await;
        finish(self.backend, tx, outcome).await
    }

    /// Every attribute link type in use.
    pub async fn attribute_type_catalog(&self) -> Result<Vec<String>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome = self.backend.nodes_by_label(&tx, labels::ATTR).await.map(|links| {
            links
                .iter()
                .filter(|n| is_attr_link(n))
                .filter_map(|n| n.get(TYPE_KEY).map(Value::to_text))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        });
        finish(self.backend, tx, outcome).await
    }

    // ========================================================================
    // Value catalogs
    // ========================================================================

    /// Distinct values of `kind` held by any entity.
    pub async fn property_values(&self, kind: &str) -> Result<Vec<Value>> {
        self.check_name(kind)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome: Result<Vec<Value>> = async {
            let mut values = Vec::new();
            for property in self.backend.nodes_by_label(&tx, kind).await? {
                if !property.has_label(labels::PROPERTY) {
                    continue;
                }
                let held = self
                    .backend
                    .get_relationships(&tx, property.id, Direction::Incoming, Some(schema::rels::IS))
                    .await?;
                if !held.is_empty() {
                    values.push(property.get(schema::VALUE_KEY).cloned().unwrap_or(Value::Null));
                }
            }
            Ok(sorted_distinct(values))
        }
        .await;
        finish(self.backend, tx, outcome).await
    }

    /// Distinct values of `kind` held by nodes carrying `label`.
    pub async fn property_values_by_label(&self, label: &str, kind: &str) -> Result<Vec<Value>> {
        let held = self.property_values_and_ids(label, kind).await?;
        Ok(sorted_distinct(held.into_iter().map(|h| h.value).collect()))
    }

    /// Every (value, entity id) pair for `kind` on nodes carrying `label`.
    pub async fn property_values_and_ids(&self, label: &str, kind: &str) -> Result<Vec<HeldValue>> {
        self.check_name(label)?;
        self.check_name(kind)?;
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome: Result<Vec<HeldValue>> = async {
            let mut held = Vec::new();
            for node in self.backend.nodes_by_label(&tx, label).await? {
                for link in encoding::prop_links(self.backend, &tx, node.id).await? {
                    if link.kind() == Some(kind) {
                        held.push(HeldValue { value: link.value(), id: node.id });
                    }
                }
            }
            held.sort_by(|a, b| a.id.cmp(&b.id).then(a.value.total_cmp(&b.value)));
            held.dedup();
            Ok(held)
        }
        .await;
        finish(self.backend, tx, outcome).await
    }

    // ========================================================================
    // Entity views
    // ========================================================================

    /// Views of every node carrying `label` that passes `filters`, keyed by id.
    ///
    /// `filters` are `kind:value` strings compared against the text of the
    /// entity's values. Entities with no requested data still appear, empty.
    pub async fn get_by_label(
        &self,
        label: &str,
        keys: &[&str],
        attrs: &[&str],
        hydrate: bool,
        filters: &[&str],
    ) -> Result<BTreeMap<NodeId, EntityView>> {
        self.check_name(label)?;
        let filters = filters
            .iter()
            .map(|f| {
                f.split_once(':')
                    .ok_or_else(|| Error::BadRequest(format!("filter '{f}' is not kind:value")))
            })
            .collect::<Result<Vec<_>>>()?;
        for (kind, _) in &filters {
            self.check_name(kind)?;
        }

        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome: Result<BTreeMap<NodeId, EntityView>> = async {
            let mut candidates = Vec::new();
            for node in self.backend.nodes_by_label(&tx, label).await? {
                if self.passes(&tx, &node, &filters).await? {
                    candidates.push(node.id);
                }
            }

            let keys = if keys.contains(&WILDCARD) {
                self.property_kinds_in(&tx, label).await?
            } else {
                owned(keys)
            };
            let attrs = if attrs.contains(&WILDCARD) {
                self.attribute_kinds_in(&tx, candidates.iter().copied()).await?
            } else {
                owned(attrs)
            };

            let mut views = BTreeMap::new();
            for id in candidates {
                let mut view = EntityView::new(id);
                if !keys.is_empty() {
                    view.properties = encoding::property_entries(self.backend, &tx, id, Some(&keys)).await?;
                }
                view.attributes = self.attributes_of(&tx, id, &attrs, hydrate).await?;
                views.insert(id, view);
            }
            Ok(views)
        }
        .await;
        finish(self.backend, tx, outcome).await
    }

    /// View of one entity.
    ///
    /// Fails with `NotFound` when the node is missing, or when property
    /// kinds were requested and the node holds none of them.
    pub async fn get_by_id(
        &self,
        id: NodeId,
        keys: &[&str],
        attrs: &[&str],
        hydrate: bool,
    ) -> Result<EntityView> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let outcome: Result<EntityView> = async {
            require_node(self.backend, &tx, id).await?;
            let mut view = EntityView::new(id);

            if !keys.is_empty() {
                let wanted = (!keys.contains(&WILDCARD)).then(|| owned(keys));
                view.properties =
                    encoding::property_entries(self.backend, &tx, id, wanted.as_deref()).await?;
                if view.properties.is_empty() {
                    return Err(Error::NotFound(format!("no requested property on node {id}")));
                }
            }

            let attrs = if attrs.contains(&WILDCARD) {
                self.attribute_kinds_in(&tx, std::iter::once(id)).await?
            } else {
                owned(attrs)
            };
            view.attributes = self.attributes_of(&tx, id, &attrs, hydrate).await?;
            Ok(view)
        }
        .await;
        finish(self.backend, tx, outcome).await
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn check_name(&self, name: &str) -> Result<()> {
        schema::validate_name(name, self.config.max_identifier_len)
    }

    async fn property_kinds_in(&self, tx: &B::Tx, label: &str) -> Result<Vec<String>> {
        let mut kinds = BTreeSet::new();
        for node in self.backend.nodes_by_label(tx, label).await? {
            for link in encoding::prop_links(self.backend, tx, node.id).await? {
                if let Some(kind) = link.kind() {
                    kinds.insert(kind.to_string());
                }
            }
        }
        Ok(kinds.into_iter().collect())
    }

    async fn attribute_kinds_in(
        &self,
        tx: &B::Tx,
        owners: impl Iterator<Item = NodeId> + Send,
    ) -> Result<Vec<String>> {
        let mut kinds = BTreeSet::new();
        for owner in owners {
            for link in encoding::attr_links(self.backend, tx, owner).await? {
                if let Some(target) = self.backend.get_node(tx, link.target).await? {
                    kinds.extend(
                        target
                            .labels
                            .into_iter()
                            .filter(|l| !self.config.is_marker(l)),
                    );
                }
            }
        }
        Ok(kinds.into_iter().collect())
    }

    /// Entity-level attribute targets per requested kind, optionally hydrated.
    async fn attributes_of(
        &self,
        tx: &B::Tx,
        id: NodeId,
        attrs: &[String],
        hydrate: bool,
    ) -> Result<BTreeMap<String, AttributeEntries>> {
        let mut out = BTreeMap::new();
        if attrs.is_empty() {
            return Ok(out);
        }

        let mut targets: Vec<Node> = Vec::new();
        for link in encoding::attr_links(self.backend, tx, id).await? {
            if targets.iter().any(|t| t.id == link.target) {
                continue;
            }
            if let Some(target) = self.backend.get_node(tx, link.target).await? {
                targets.push(target);
            }
        }
        targets.sort_by_key(|t| t.id);

        for kind in attrs {
            let ids: Vec<NodeId> = targets
                .iter()
                .filter(|t| t.has_label(kind))
                .map(|t| t.id)
                .collect();
            if ids.is_empty() {
                continue;
            }
            let entries = if hydrate {
                let mut hydrated = Vec::with_capacity(ids.len());
                for target in ids {
                    hydrated.push(self.hydrate(tx, target).await?);
                }
                AttributeEntries::Hydrated(hydrated)
            } else {
                AttributeEntries::Ids(ids)
            };
            out.insert(kind.clone(), entries);
        }
        Ok(out)
    }

    /// One level: the target's own values, never its attributes.
    async fn hydrate(&self, tx: &B::Tx, target: NodeId) -> Result<HydratedAttribute> {
        let node = require_node(self.backend, tx, target).await?;
        let mut properties = encoding::property_values(self.backend, tx, target).await?;
        for (key, value) in node.properties {
            properties.entry(key).or_insert_with(|| vec![value]);
        }
        Ok(HydratedAttribute { id: target, properties })
    }

    /// True when `node` satisfies every `kind:value` filter.
    async fn passes(&self, tx: &B::Tx, node: &Node, filters: &[(&str, &str)]) -> Result<bool> {
        if filters.is_empty() {
            return Ok(true);
        }
        let held = encoding::prop_links(self.backend, tx, node.id).await?;
        Ok(filters.iter().all(|(kind, wanted)| {
            node.get(kind).is_some_and(|v| v.to_text() == *wanted)
                || held
                    .iter()
                    .any(|l| l.kind() == Some(*kind) && l.value().to_text() == *wanted)
        }))
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn sorted_distinct(mut values: Vec<Value>) -> Vec<Value> {
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Graph;
    use pretty_assertions::assert_eq;

    async fn person(graph: &Graph<crate::MemoryBackend>, name: &str) -> NodeId {
        let mut batch = Mutations::new();
        batch.stage_property("name", name);
        graph.writer().create_node(&["Person"], &batch).await.unwrap()
    }

    #[tokio::test]
    async fn test_filters_match_property_text() {
        let graph = Graph::open_memory().await.unwrap();
        let ada = person(&graph, "Ada").await;
        person(&graph, "Grace").await;

        let views = graph
            .reader()
            .get_by_label("Person", &["name"], &[], false, &["name:Ada"])
            .await
            .unwrap();
        assert_eq!(views.keys().copied().collect::<Vec<_>>(), vec![ada]);
    }

    #[tokio::test]
    async fn test_malformed_filter_is_bad_request() {
        let graph = Graph::open_memory().await.unwrap();
        let err = graph
            .reader()
            .get_by_label("Person", &[], &[], false, &["name"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unsafe_label_is_rejected() {
        let graph = Graph::open_memory().await.unwrap();
        let err = graph.reader().property_kinds("Person) DETACH DELETE (n").await.unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_missing_node_is_not_found() {
        let graph = Graph::open_memory().await.unwrap();
        let err = graph.reader().labels_of(NodeId(404)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn test_get_by_id_without_requested_kind_is_not_found() {
        let graph = Graph::open_memory().await.unwrap();
        let ada = person(&graph, "Ada").await;

        let err = graph.reader().get_by_id(ada, &["age"], &[], false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let bare = graph.reader().get_by_id(ada, &[], &[], false).await.unwrap();
        assert!(bare.properties.is_empty() && bare.attributes.is_empty());
    }
}
