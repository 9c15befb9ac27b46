//! # Entity Writer
//!
//! Reconciles a staged `Mutations` batch against the stored encoding.
//!
//! ## Two passes
//!
//! 1. `steps`, in payload order: property deletes, entity attribute
//!    attach/detach, value updates and new values. New values mint real
//!    Property ids for their local handles.
//! 2. `attachments`: attribute links hung off property links, which may
//!    name a property by a handle minted in pass 1.
//!
//! Each public call is one `ReadWrite` transaction, rolled back on error.
//! Date targets are routed through the time tree inside that transaction.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::config::GraphConfig;
use crate::encoding::{self, require_node, PropLink};
use crate::model::*;
use crate::schema::{self, labels, rels};
use crate::storage::StorageBackend;
use crate::timetree;
use crate::tx::{finish, TxMode};
use crate::{Error, Result};

/// What one write call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub properties_linked: usize,
    pub properties_unlinked: usize,
    pub attributes_attached: usize,
    pub attributes_detached: usize,
    pub orphans_collected: usize,
    /// Real Property ids minted for staged handles.
    pub staged: HashMap<LocalHandle, NodeId>,
}

/// Write-side component, borrowed from a `Graph`.
pub struct EntityWriter<'g, B: StorageBackend> {
    backend: &'g B,
    config: &'g GraphConfig,
}

impl<'g, B: StorageBackend> EntityWriter<'g, B> {
    pub fn new(backend: &'g B, config: &'g GraphConfig) -> Self {
        Self { backend, config }
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Create a node with `labels` and apply `mutations` to it.
    ///
    /// Nothing pre-exists on a fresh node, so deletes, detaches and
    /// `reverse` are ignored.
    pub async fn create_node(&self, node_labels: &[&str], mutations: &Mutations) -> Result<NodeId> {
        if node_labels.is_empty() {
            return Err(Error::BadRequest("a node needs at least one label".into()));
        }
        for label in node_labels {
            schema::validate_label(label, self.config.max_identifier_len)?;
        }
        mutations.validate(self.config)?;

        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome: Result<(NodeId, WriteSummary)> = async {
            if node_labels.contains(&labels::ATTRIBUTE) {
                self.check_attribute_labels(&tx, node_labels).await?;
            }
            let id = self.backend.create_node(&mut tx, node_labels, PropertyMap::new()).await?;
            debug!(node = %id, labels = ?node_labels, "node created");
            let summary = self.apply(&mut tx, id, mutations, true).await?;
            Ok((id, summary))
        }
        .await;
        let (id, summary) = finish(self.backend, tx, outcome).await?;
        info!(node = %id, linked = summary.properties_linked, attached = summary.attributes_attached, "create_node complete");
        Ok(id)
    }

    /// Apply `mutations` to an existing node.
    pub async fn set_by_id(&self, id: NodeId, mutations: &Mutations) -> Result<WriteSummary> {
        mutations.validate(self.config)?;

        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome: Result<WriteSummary> = async {
            require_node(self.backend, &tx, id).await?;
            if let Some(reverse) = mutations.reverse {
                self.reverse_edge(&mut tx, id, reverse).await?;
            }
            self.apply(&mut tx, id, mutations, false).await
        }
        .await;
        let summary = finish(self.backend, tx, outcome).await?;
        info!(
            node = %id,
            linked = summary.properties_linked,
            unlinked = summary.properties_unlinked,
            attached = summary.attributes_attached,
            detached = summary.attributes_detached,
            collected = summary.orphans_collected,
            "set_by_id complete"
        );
        Ok(summary)
    }

    /// Join `source` and `target` through the `edge` body node.
    ///
    /// Prop and Attr link bodies get `HAS`/`IS`; any other body `LINK`/`LINK`.
    pub async fn create_edge(&self, source: NodeId, edge: NodeId, target: NodeId) -> Result<()> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome: Result<(&str, &str)> = async {
            let body = require_node(self.backend, &tx, edge).await?;
            require_node(self.backend, &tx, source).await?;
            require_node(self.backend, &tx, target).await?;

            let (inbound, outbound) = if body.has_label(labels::ATTR) || body.has_label(labels::PROP) {
                (rels::HAS, rels::IS)
            } else {
                (rels::LINK, rels::LINK)
            };
            self.backend.create_relationship(&mut tx, source, edge, inbound, PropertyMap::new()).await?;
            self.backend.create_relationship(&mut tx, edge, target, outbound, PropertyMap::new()).await?;
            Ok((inbound, outbound))
        }
        .await;
        let (inbound, outbound) = finish(self.backend, tx, outcome).await?;
        info!(source = %source, edge = %edge, target = %target, inbound, outbound, "edge created");
        Ok(())
    }

    /// Remove a node with its property links, collecting Properties it was
    /// the last holder of, and every attribute link touching it.
    pub async fn delete_by_id(&self, id: NodeId) -> Result<WriteSummary> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome: Result<WriteSummary> = async {
            require_node(self.backend, &tx, id).await?;
            let mut summary = WriteSummary::default();

            for link in encoding::prop_links(self.backend, &tx, id).await? {
                if encoding::unlink_property(self.backend, &mut tx, &link).await? {
                    summary.orphans_collected += 1;
                }
                summary.properties_unlinked += 1;
            }

            for rel in self.backend.get_relationships(&tx, id, Direction::Both, None).await? {
                let Some(neighbour) = rel.other_node(id) else { continue };
                let Some(node) = self.backend.get_node(&tx, neighbour).await? else { continue };
                if encoding::is_attr_link(&node) {
                    encoding::remove_link(self.backend, &mut tx, neighbour).await?;
                    summary.attributes_detached += 1;
                }
            }

            self.backend.detach_delete_node(&mut tx, id).await?;
            Ok(summary)
        }
        .await;
        let summary = finish(self.backend, tx, outcome).await?;
        info!(
            node = %id,
            unlinked = summary.properties_unlinked,
            collected = summary.orphans_collected,
            detached = summary.attributes_detached,
            "delete_by_id complete"
        );
        Ok(summary)
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    async fn apply(
        &self,
        tx: &mut B::Tx,
        id: NodeId,
        mutations: &Mutations,
        fresh: bool,
    ) -> Result<WriteSummary> {
        self.check_property_kinds(&*tx, mutations).await?;
        let mut summary = WriteSummary::default();
        let mut dated = false;

        for step in &mutations.steps {
            match step {
                Step::DeleteProperty { pid, aid } if !fresh => {
                    self.delete_property(tx, id, *pid, *aid, &mut summary).await?;
                }
                Step::DetachAttribute { aid, attr_type } if !fresh => {
                    summary.attributes_detached +=
                        self.detach_attribute(tx, id, *aid, attr_type.as_deref()).await?;
                }
                Step::DeleteProperty { .. } | Step::DetachAttribute { .. } => {
                    debug!(node = %id, step = ?step, "ignored on a fresh node");
                }
                Step::AttachAttribute { target, attr_type } => {
                    dated |= self.attach(tx, id, target, attr_type).await?;
                    summary.attributes_attached += 1;
                }
                Step::UpdateProperty { kind, pid, value } => {
                    self.update_property(tx, id, kind, *pid, value, fresh, &mut summary).await?;
                }
                Step::NewProperty { kind, handle, value } => {
                    let linked = encoding::merge_prop_link(self.backend, tx, id, kind, value).await?;
                    summary.staged.insert(*handle, linked.pid);
                    if linked.created_link {
                        summary.properties_linked += 1;
                    }
                }
            }
        }

        for attachment in &mutations.attachments {
            let pid = match attachment.property {
                PropertyRef::Existing(pid) => pid,
                PropertyRef::Staged(handle) => *summary.staged.get(&handle).ok_or_else(|| {
                    Error::BadRequest(format!("pid {} was never staged", handle.0))
                })?,
            };
            let link = self.held_link(tx, id, pid).await?.ok_or_else(|| {
                Error::NotFound(format!("node {id} holds no property {pid}"))
            })?;
            dated |= self.attach(tx, link.link, &attachment.target, &attachment.attr_type).await?;
            summary.attributes_attached += 1;
        }

        if dated {
            timetree::sweep_in(self.backend, tx).await?;
        }
        Ok(summary)
    }

    /// Property kinds and attribute kinds share the keys of an entity view,
    /// so a name is one or the other.
    async fn check_property_kinds(&self, tx: &B::Tx, mutations: &Mutations) -> Result<()> {
        let mut seen = HashSet::new();
        for step in &mutations.steps {
            let (Step::NewProperty { kind, .. } | Step::UpdateProperty { kind, .. }) = step else {
                continue;
            };
            if !seen.insert(kind.as_str()) {
                continue;
            }
            let clash = self
                .backend
                .nodes_by_label(tx, kind)
                .await?
                .iter()
                .any(|n| n.has_label(labels::ATTRIBUTE));
            if clash {
                return Err(Error::InvalidIdentifier(format!("'{kind}' is already an attribute kind")));
            }
        }
        Ok(())
    }

    async fn check_attribute_labels(&self, tx: &B::Tx, node_labels: &[&str]) -> Result<()> {
        for label in node_labels.iter().filter(|l| !self.config.is_marker(l)) {
            let clash = self
                .backend
                .nodes_by_label(tx, label)
                .await?
                .iter()
                .any(|n| n.has_label(labels::PROPERTY));
            if clash {
                return Err(Error::InvalidIdentifier(format!("'{label}' is already a property kind")));
            }
        }
        Ok(())
    }

    /// Attach `target` to `owner`. Returns true when it went through the time tree.
    async fn attach(&self, tx: &mut B::Tx, owner: NodeId, target: &AttrTarget, attr_type: &str) -> Result<bool> {
        match target {
            AttrTarget::Date(date) => {
                timetree::insert_in(self.backend, tx, date, owner, attr_type).await?;
                Ok(true)
            }
            AttrTarget::Node(aid) => {
                let node = require_node(self.backend, &*tx, *aid).await?;
                if !node.has_label(labels::ATTRIBUTE) {
                    return Err(Error::NotFound(format!("attribute {aid}")));
                }
                encoding::merge_attr_link(self.backend, tx, owner, *aid, attr_type).await?;
                Ok(false)
            }
        }
    }

    async fn held_link(&self, tx: &B::Tx, id: NodeId, pid: NodeId) -> Result<Option<PropLink>> {
        Ok(encoding::prop_links(self.backend, tx, id)
            .await?
            .into_iter()
            .find(|l| l.property.id == pid))
    }

    /// Drop the link to `pid`, or only the attribute link to `aid` under it.
    async fn delete_property(
        &self,
        tx: &mut B::Tx,
        id: NodeId,
        pid: NodeId,
        aid: Option<NodeId>,
        summary: &mut WriteSummary,
    ) -> Result<()> {
        let Some(link) = self.held_link(&*tx, id, pid).await? else {
            debug!(node = %id, pid = %pid, "delete of a property the node does not hold");
            return Ok(());
        };
        match aid {
            Some(aid) => {
                for attr in encoding::attr_links(self.backend, &*tx, link.link).await? {
                    if attr.target == aid {
                        encoding::remove_link(self.backend, tx, attr.link).await?;
                        summary.attributes_detached += 1;
                    }
                }
            }
            None => {
                if encoding::unlink_property(self.backend, tx, &link).await? {
                    summary.orphans_collected += 1;
                }
                summary.properties_unlinked += 1;
            }
        }
        Ok(())
    }

    /// Remove the entity's attribute links to `aid`, optionally of one type.
    async fn detach_attribute(
        &self,
        tx: &mut B::Tx,
        id: NodeId,
        aid: NodeId,
        attr_type: Option<&str>,
    ) -> Result<usize> {
        let mut removed = 0;
        for attr in encoding::attr_links(self.backend, &*tx, id).await? {
            if attr.target == aid && attr_type.is_none_or(|t| t == attr.attr_type) {
                encoding::remove_link(self.backend, tx, attr.link).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Confirm or replace the value held through `pid`.
    #[allow(clippy::too_many_arguments)]
    async fn update_property(
        &self,
        tx: &mut B::Tx,
        id: NodeId,
        kind: &str,
        pid: NodeId,
        value: &Value,
        fresh: bool,
        summary: &mut WriteSummary,
    ) -> Result<()> {
        let stored = require_node(self.backend, &*tx, pid).await?;
        if !stored.has_labels(&[labels::PROPERTY, kind]) {
            return Err(Error::NotFound(format!("property {pid} of kind '{kind}'")));
        }
        let unchanged = stored.get(schema::VALUE_KEY) == Some(value);
        if unchanged && !fresh {
            debug!(node = %id, pid = %pid, "value unchanged");
            return Ok(());
        }

        if !unchanged {
            if let Some(link) = self.held_link(&*tx, id, pid).await? {
                if encoding::unlink_property(self.backend, tx, &link).await? {
                    summary.orphans_collected += 1;
                }
                summary.properties_unlinked += 1;
            }
        }
        let linked = encoding::merge_prop_link(self.backend, tx, id, kind, value).await?;
        if linked.created_link {
            summary.properties_linked += 1;
        }
        Ok(())
    }

    /// Rewire `source → edge → target` into `target → edge → source`.
    async fn reverse_edge(&self, tx: &mut B::Tx, edge: NodeId, reverse: Reverse) -> Result<()> {
        let Reverse { source, target } = reverse;
        let inbound = self
            .backend
            .get_relationships(&*tx, edge, Direction::Incoming, None)
            .await?
            .into_iter()
            .find(|r| r.src == source && (r.rel_type == rels::LINK || r.rel_type == rels::HAS));
        let outbound = self
            .backend
            .get_relationships(&*tx, edge, Direction::Outgoing, None)
            .await?
            .into_iter()
            .find(|r| r.dst == target && (r.rel_type == rels::LINK || r.rel_type == rels::IS));
        let (Some(inbound), Some(outbound)) = (inbound, outbound) else {
            return Err(Error::NotFound(format!("edge {source} -> {edge} -> {target}")));
        };

        self.backend
            .create_relationship(tx, target, edge, &inbound.rel_type, PropertyMap::new())
            .await?;
        self.backend
            .create_relationship(tx, edge, source, &outbound.rel_type, PropertyMap::new())
            .await?;
        self.backend.delete_relationship(tx, inbound.id).await?;
        self.backend.delete_relationship(tx, outbound.id).await?;
        debug!(edge = %edge, source = %source, target = %target, "edge reversed");
        Ok(())
    }
}
