//! # Storage Backend Trait
//!
//! The contract between the entity layer and the graph store. Calls are
//! typed and parameterized: values travel as `Value`, labels and
//! relationship types as already-validated names. Nothing is ever spliced
//! into query text.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory, undo-journaled transactions |

pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::Result;

pub use memory::MemoryBackend;

// ============================================================================
// Backend Configuration
// ============================================================================

/// Configuration for connecting to a storage backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-memory (no persistence)
    #[default]
    Memory,
}

// ============================================================================
// Merge result
// ============================================================================

/// Outcome of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    pub id: NodeId,
    /// False when an existing node matched.
    pub created: bool,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
///
/// One call is one store round-trip and is atomic on its own. Multi-call
/// atomicity comes only from the transaction the calls share.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction, undoing every write made through it.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    async fn create_node(
        &self,
        tx: &mut Self::Tx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId>;

    /// Get a node by ID. Returns None if not found.
    async fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships.
    async fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool>;

    /// Set a property on a node (upsert).
    async fn set_node_property(
        &self,
        tx: &mut Self::Tx,
        id: NodeId,
        key: &str,
        val: Value,
    ) -> Result<()>;

    /// Add a label to a node.
    async fn add_label(&self, tx: &mut Self::Tx, id: NodeId, label: &str) -> Result<()>;

    /// Delete a node and all its relationships in one operation.
    ///
    /// Default: get all relationships, delete each, then delete the node.
    async fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool> {
        let rels = self.get_relationships(tx, id, Direction::Both, None).await?;
        for rel in &rels {
            self.delete_relationship(tx, rel.id).await?;
        }
        self.delete_node(tx, id).await
    }

    // ========================================================================
    // Conditional create
    // ========================================================================

    /// Find the node carrying every label in `labels` whose `key` equals
    /// `value`, or create it. Must be a single atomic step: two concurrent
    /// merges of the same (labels, key, value) yield one node.
    async fn merge_node(
        &self,
        tx: &mut Self::Tx,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Result<Merged>;

    /// Like `merge_node`, scoped to the nodes reached from `parent` through
    /// an outgoing `rel_type` relationship. A created node is attached under
    /// `parent` in the same atomic step.
    async fn merge_child(
        &self,
        tx: &mut Self::Tx,
        parent: NodeId,
        rel_type: &str,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Result<Merged>;

    /// `merge_node`, plus a `from -[rel_type]-> node` relationship created in
    /// the same atomic step. The merged node cannot be collected between the
    /// lookup and the link.
    async fn merge_linked(
        &self,
        tx: &mut Self::Tx,
        from: NodeId,
        rel_type: &str,
        labels: &[&str],
        key: &str,
        value: &Value,
    ) -> Result<Merged>;

    /// Delete `id` if no relationship remains on it, atomically with respect
    /// to merges. Returns true if it was deleted.
    ///
    /// `key` is the property the node is merged on. If a rollback would
    /// restore the node while another live node with the same labels and
    /// `key` value exists, the live node is kept and the restored
    /// relationships are re-pointed at it.
    async fn delete_orphan(&self, tx: &mut Self::Tx, id: NodeId, key: &str) -> Result<bool>;

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two nodes.
    async fn create_relationship(
        &self,
        tx: &mut Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId>;

    /// Get a relationship by ID.
    async fn get_relationship(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Delete a relationship. Returns true if it existed.
    async fn delete_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<bool>;

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Get all relationships of a node, optionally filtered by direction and type.
    async fn get_relationships(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>>;

    // ========================================================================
    // Schema introspection
    // ========================================================================

    /// Total number of nodes.
    async fn node_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// Total number of relationships.
    async fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// All distinct labels in the graph.
    async fn labels(&self, tx: &Self::Tx) -> Result<Vec<String>>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// Return all nodes, in ascending id order.
    async fn all_nodes(&self, tx: &Self::Tx) -> Result<Vec<Node>>;

    /// Find all nodes with a given label, in ascending id order.
    async fn nodes_by_label(&self, tx: &Self::Tx, label: &str) -> Result<Vec<Node>>;
}
