//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It uses hash maps protected by `parking_lot` locks.
//!
//! ## Transactions
//!
//! Writes are applied immediately and recorded in the transaction's undo
//! journal. `commit_tx()` drops the journal; `rollback_tx()` replays it in
//! reverse. There is no isolation: a concurrent reader sees uncommitted
//! writes, and a rollback that finds its node re-used by another writer
//! leaves that node in place.
//!
//! ## Merges
//!
//! `merge_node()`, `merge_child()` and `merge_linked()` serialize on one
//! merge lock, so the lookup and the create happen as one step with respect
//! to other merges. `delete_orphan()` and rollbacks take the same lock: a
//! collected node is only restored if no other writer has merged its
//! replacement in the meantime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::model::*;
use crate::tx::{Transaction, TxId, TxMode};
use crate::{Error, Result};
use super::{Merged, StorageBackend};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    nodes: RwLock<HashMap<NodeId, Node>>,
    relationships: RwLock<HashMap<RelId, Relationship>>,
    /// node_id → list of relationship IDs
    adjacency: RwLock<HashMap<NodeId, Vec<RelId>>>,
    /// label → node IDs
    label_index: RwLock<HashMap<String, Vec<NodeId>>>,
    merge_lock: Mutex<()>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                nodes: RwLock::new(HashMap::new()),
                relationships: RwLock::new(HashMap::new()),
                adjacency: RwLock::new(HashMap::new()),
                label_index: RwLock::new(HashMap::new()),
                merge_lock: Mutex::new(()),
                next_node_id: AtomicU64::new(1),
                next_rel_id: AtomicU64::new(1),
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// One reversible write.
#[derive(Debug)]
enum Undo {
    CreatedNode(NodeId),
    DeletedNode(Node),
    /// Deleted by `delete_orphan`; `key` is what the node is merged on.
    CollectedNode { node: Node, key: String },
    CreatedRel(RelId),
    DeletedRel(Relationship),
    AddedLabel(NodeId, String),
    SetProperty { node: NodeId, key: String, previous: Option<Value> },
}

/// In-memory transaction: a mode plus the undo journal of its writes.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    journal: Vec<Undo>,
}

impl MemoryTx {
    /// Number of writes recorded so far.
    pub fn pending_writes(&self) -> usize {
        self.journal.len()
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// Raw mutations (no journaling, no tx checks)
// ============================================================================

impl MemoryInner {
    fn insert_node(&self, node: Node) {
        let id = node.id;
        {
            let mut idx = self.label_index.write();
            for label in &node.labels {
                idx.entry(label.clone()).or_default().push(id);
            }
        }
        self.nodes.write().insert(id, node);
        self.adjacency.write().entry(id).or_default();
    }

    fn remove_node(&self, id: NodeId) -> Result<Option<Node>> {
        {
            let adj = self.adjacency.read();
            if let Some(rels) = adj.get(&id) {
                if !rels.is_empty() {
                    return Err(Error::ConstraintViolation(format!(
                        "Cannot delete node {id} with {} relationships. Delete relationships first.",
                        rels.len()
                    )));
                }
            }
        }

        let removed = self.nodes.write().remove(&id);
        self.adjacency.write().remove(&id);

        if let Some(node) = &removed {
            let mut idx = self.label_index.write();
            for label in &node.labels {
                if let Some(ids) = idx.get_mut(label) {
                    ids.retain(|nid| *nid != id);
                }
            }
        }
        Ok(removed)
    }

    fn insert_relationship(&self, rel: Relationship) {
        let (id, src, dst) = (rel.id, rel.src, rel.dst);
        self.relationships.write().insert(id, rel);

        let mut adj = self.adjacency.write();
        adj.entry(src).or_default().push(id);
        if src != dst {
            adj.entry(dst).or_default().push(id);
        }
    }

    fn remove_relationship(&self, id: RelId) -> Option<Relationship> {
        let removed = self.relationships.write().remove(&id);
        if let Some(rel) = &removed {
            let mut adj = self.adjacency.write();
            if let Some(rels) = adj.get_mut(&rel.src) {
                rels.retain(|rid| *rid != id);
            }
            if rel.src != rel.dst {
                if let Some(rels) = adj.get_mut(&rel.dst) {
                    rels.retain(|rid| *rid != id);
                }
            }
        }
        removed
    }

    fn remove_label(&self, id: NodeId, label: &str) {
        if let Some(node) = self.nodes.write().get_mut(&id) {
            node.labels.retain(|l| l != label);
        }
        if let Some(ids) = self.label_index.write().get_mut(label) {
            ids.retain(|nid| *nid != id);
        }
    }

    /// Insert a fresh node carrying only `key = value`.
    fn insert_keyed(&self, labels: &[&str], key: &str, value: &Value) -> NodeId {
        let id = self.new_node_id();
        let mut properties = PropertyMap::new();
        properties.insert(key.to_string(), value.clone());
        self.insert_node(Node {
            id,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties,
        });
        id
    }

    fn new_node_id(&self) -> NodeId {
        NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    fn new_rel_id(&self) -> RelId {
        RelId(self.next_rel_id.fetch_add(1, Ordering::Relaxed))
    }

    fn find_node(&self, labels: &[&str], key: &str, value: &Value) -> Option<NodeId> {
        let first = labels.first()?;
        let idx = self.label_index.read();
        let nodes = self.nodes.read();
        idx.get(*first)?
            .iter()
            .filter_map(|id| nodes.get(id))
            .filter(|n| n.has_labels(labels) && n.get(key) == Some(value))
            .map(|n| n.id)
            .min()
    }

    fn find_child(
        &self,
        parent: NodeId,
        rel_type: &str,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Option<NodeId> {
        let adj = self.adjacency.read();
        let rels = self.relationships.read();
        let nodes = self.nodes.read();
        adj.get(&parent)?
            .iter()
            .filter_map(|rid| rels.get(rid))
            .filter(|r| r.src == parent && r.rel_type == rel_type)
            .filter_map(|r| nodes.get(&r.dst))
            .filter(|n| n.has_labels(labels) && n.get(key) == Some(value))
            .map(|n| n.id)
            .min()
    }

    /// Replay one undo step. `moved` maps collected nodes that were not
    /// restored to the live node that replaced them.
    fn undo(&self, step: Undo, tx: TxId, moved: &mut HashMap<NodeId, NodeId>) {
        match step {
            Undo::CreatedNode(id) => {
                if let Err(e) = self.remove_node(id) {
                    warn!(%tx, node = %id, error = %e, "rollback left node in place");
                }
            }
            Undo::DeletedNode(node) => self.insert_node(node),
            Undo::CollectedNode { node, key } => {
                let live = {
                    let labels: Vec<&str> = node.labels.iter().map(String::as_str).collect();
                    node.get(&key).and_then(|v| self.find_node(&labels, &key, v))
                };
                match live {
                    Some(live) => {
                        debug!(%tx, node = %node.id, live = %live, "collected node superseded, relinking");
                        moved.insert(node.id, live);
                    }
                    None => self.insert_node(node),
                }
            }
            Undo::CreatedRel(id) => {
                self.remove_relationship(id);
            }
            Undo::DeletedRel(mut rel) => {
                rel.src = moved.get(&rel.src).copied().unwrap_or(rel.src);
                rel.dst = moved.get(&rel.dst).copied().unwrap_or(rel.dst);
                let nodes = self.nodes.read();
                let endpoints_present = nodes.contains_key(&rel.src) && nodes.contains_key(&rel.dst);
                drop(nodes);
                if endpoints_present {
                    self.insert_relationship(rel);
                } else {
                    warn!(%tx, rel = %rel.id, "rollback could not restore relationship");
                }
            }
            Undo::AddedLabel(id, label) => self.remove_label(id, &label),
            Undo::SetProperty { node, key, previous } => {
                if let Some(n) = self.nodes.write().get_mut(&node) {
                    match previous {
                        Some(v) => { n.properties.insert(key, v); }
                        None => { n.properties.remove(&key); }
                    }
                }
            }
        }
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn shutdown(&self) -> Result<()> { Ok(()) }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx { id, mode, journal: Vec::new() })
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        drop(tx.journal);
        Ok(())
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        let MemoryTx { id, journal, .. } = tx;
        let _guard = self.inner.merge_lock.lock();
        let mut moved = HashMap::new();
        for step in journal.into_iter().rev() {
            self.inner.undo(step, id, &mut moved);
        }
        Ok(())
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    async fn create_node(
        &self,
        tx: &mut MemoryTx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId> {
        tx.ensure_writable()?;
        let id = self.inner.new_node_id();
        let node = Node {
            id,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties: props,
        };
        self.inner.insert_node(node);
        tx.journal.push(Undo::CreatedNode(id));
        Ok(id)
    }

    async fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    async fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        tx.ensure_writable()?;
        let removed = self.inner.remove_node(id)?;
        let existed = removed.is_some();
        if let Some(node) = removed {
            tx.journal.push(Undo::DeletedNode(node));
        }
        Ok(existed)
    }

    async fn set_node_property(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        key: &str,
        val: Value,
    ) -> Result<()> {
        tx.ensure_writable()?;
        let previous = {
            let mut nodes = self.inner.nodes.write();
            let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
            node.properties.insert(key.to_string(), val)
        };
        tx.journal.push(Undo::SetProperty { node: id, key: key.to_string(), previous });
        Ok(())
    }

    async fn add_label(&self, tx: &mut MemoryTx, id: NodeId, label: &str) -> Result<()> {
        tx.ensure_writable()?;
        let mut nodes = self.inner.nodes.write();
        let node = nodes.get_mut(&id).ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        if !node.has_label(label) {
            node.labels.push(label.to_string());
            drop(nodes);
            self.inner.label_index.write().entry(label.to_string()).or_default().push(id);
            tx.journal.push(Undo::AddedLabel(id, label.to_string()));
        }
        Ok(())
    }

    // ========================================================================
    // Conditional create
    // ========================================================================

    async fn merge_node(
        &self,
        tx: &mut MemoryTx,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Result<Merged> {
        tx.ensure_writable()?;
        let _guard = self.inner.merge_lock.lock();
        if let Some(id) = self.inner.find_node(labels, key, value) {
            return Ok(Merged { id, created: false });
        }

        let id = self.inner.insert_keyed(labels, key, value);
        tx.journal.push(Undo::CreatedNode(id));
        Ok(Merged { id, created: true })
    }

    async fn merge_child(
        &self,
        tx: &mut MemoryTx,
        parent: NodeId,
        rel_type: &str,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Result<Merged> {
        tx.ensure_writable()?;
        let _guard = self.inner.merge_lock.lock();
        if !self.inner.nodes.read().contains_key(&parent) {
            return Err(Error::NotFound(format!("Parent node {parent}")));
        }
        if let Some(id) = self.inner.find_child(parent, rel_type, labels, key, value) {
            return Ok(Merged { id, created: false });
        }

        let id = self.inner.insert_keyed(labels, key, value);
        tx.journal.push(Undo::CreatedNode(id));

        let rel_id = self.inner.new_rel_id();
        self.inner.insert_relationship(Relationship::new(rel_id, parent, id, rel_type));
        tx.journal.push(Undo::CreatedRel(rel_id));
        Ok(Merged { id, created: true })
    }

    async fn merge_linked(
        &self,
        tx: &mut MemoryTx,
        from: NodeId,
        rel_type: &str,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Result<Merged> {
        tx.ensure_writable()?;
        let _guard = self.inner.merge_lock.lock();
        if !self.inner.nodes.read().contains_key(&from) {
            return Err(Error::NotFound(format!("Source node {from}")));
        }
        let merged = match self.inner.find_node(labels, key, value) {
            Some(id) => Merged { id, created: false },
            None => {
                let id = self.inner.insert_keyed(labels, key, value);
                tx.journal.push(Undo::CreatedNode(id));
                Merged { id, created: true }
            }
        };

        let rel_id = self.inner.new_rel_id();
        self.inner.insert_relationship(Relationship::new(rel_id, from, merged.id, rel_type));
        tx.journal.push(Undo::CreatedRel(rel_id));
        Ok(merged)
    }

    async fn delete_orphan(&self, tx: &mut MemoryTx, id: NodeId, key: &str) -> Result<bool> {
        tx.ensure_writable()?;
        let _guard = self.inner.merge_lock.lock();
        let removed = match self.inner.remove_node(id) {
            Ok(removed) => removed,
            Err(Error::ConstraintViolation(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match removed {
            Some(node) => {
                tx.journal.push(Undo::CollectedNode { node, key: key.to_string() });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    async fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        tx.ensure_writable()?;
        // Verify both nodes exist
        {
            let nodes = self.inner.nodes.read();
            if !nodes.contains_key(&src) {
                return Err(Error::NotFound(format!("Source node {src}")));
            }
            if !nodes.contains_key(&dst) {
                return Err(Error::NotFound(format!("Target node {dst}")));
            }
        }

        let id = self.inner.new_rel_id();
        let mut rel = Relationship::new(id, src, dst, rel_type);
        rel.properties = props;
        self.inner.insert_relationship(rel);
        tx.journal.push(Undo::CreatedRel(id));
        Ok(id)
    }

    async fn get_relationship(&self, _tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        Ok(self.inner.relationships.read().get(&id).cloned())
    }

    async fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        tx.ensure_writable()?;
        let removed = self.inner.remove_relationship(id);
        let existed = removed.is_some();
        if let Some(rel) = removed {
            tx.journal.push(Undo::DeletedRel(rel));
        }
        Ok(existed)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    async fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let adj = self.inner.adjacency.read();
        let rels = self.inner.relationships.read();

        let mut result: Vec<Relationship> = adj
            .get(&node)
            .map(|ids| ids.iter().filter_map(|rid| rels.get(rid)).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .filter(|rel| match dir {
                Direction::Outgoing => rel.src == node,
                Direction::Incoming => rel.dst == node,
                Direction::Both => true,
            })
            .filter(|rel| rel_type.is_none_or(|t| rel.rel_type == t))
            .cloned()
            .collect();
        result.sort_by_key(|r| r.id);
        Ok(result)
    }

    // ========================================================================
    // Schema introspection
    // ========================================================================

    async fn node_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.nodes.read().len() as u64)
    }

    async fn relationship_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.relationships.read().len() as u64)
    }

    async fn labels(&self, _tx: &MemoryTx) -> Result<Vec<String>> {
        let mut labels: Vec<String> = self
            .inner
            .label_index
            .read()
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(label, _)| label.clone())
            .collect();
        labels.sort();
        Ok(labels)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    async fn all_nodes(&self, _tx: &MemoryTx) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.inner.nodes.read().values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn nodes_by_label(&self, _tx: &MemoryTx, label: &str) -> Result<Vec<Node>> {
        let idx = self.inner.label_index.read();
        let nodes = self.inner.nodes.read();

        let mut found: Vec<Node> = idx
            .get(label)
            .map(|ids| ids.iter().filter_map(|id| nodes.get(id).cloned()).collect())
            .unwrap_or_default();
        found.sort_by_key(|n| n.id);
        Ok(found)
    }
}

// ============================================================================
// Tests
// ============================================================================
