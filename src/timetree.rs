//! # Time Tree Indexer
//!
//! Dates are indexed through one shared hierarchy:
//!
//! ```text
//! (:Year {value})-[:CHILD]->(:Month {value})-[:CHILD]->(:Day {value})
//! ```
//!
//! Year nodes are merged globally by value, Month and Day nodes by value
//! under their parent, so every entity referencing a date points at the
//! same node. After each insertion a sweep gives every time node still
//! lacking one a `display` Property (`d/m/y`, `m/y` or `y`) and the
//! `Node:Attribute:Time` labels that make it an attribute target.

use tracing::{debug, info};

use crate::encoding::{self, require_node};
use crate::model::*;
use crate::schema::{labels, rels, DISPLAY_KIND, VALUE_KEY};
use crate::storage::StorageBackend;
use crate::tx::{finish, TxMode};
use crate::Result;

/// Time-tree component, borrowed from a `Graph`.
pub struct TimeTree<'g, B: StorageBackend> {
    backend: &'g B,
}

impl<'g, B: StorageBackend> TimeTree<'g, B> {
    pub fn new(backend: &'g B) -> Self {
        Self { backend }
    }

    /// Attach the deepest node for `date` to `target` (an entity or a
    /// property link) through an attribute link of `attr_type`, then run
    /// the display sweep. Returns the time node.
    pub async fn insert_date(&self, date: &DateSpec, target: NodeId, attr_type: &str) -> Result<NodeId> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome: Result<NodeId> = async {
            let node = insert_in(self.backend, &mut tx, date, target, attr_type).await?;
            sweep_in(self.backend, &mut tx).await?;
            Ok(node)
        }
        .await;
        let node = finish(self.backend, tx, outcome).await?;
        info!(date = %date, target = %target, node = %node, "date indexed");
        Ok(node)
    }

    /// Run the display sweep on its own. Returns how many nodes it filled.
    pub async fn refresh_display(&self) -> Result<usize> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let outcome = sweep_in(self.backend, &mut tx).await;
        finish(self.backend, tx, outcome).await
    }
}

/// Resolve `date` to its time node, creating missing levels, and link it.
pub(crate) async fn insert_in<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    date: &DateSpec,
    target: NodeId,
    attr_type: &str,
) -> Result<NodeId> {
    require_node(backend, &*tx, target).await?;

    let year = backend
        .merge_node(tx, &[labels::YEAR], VALUE_KEY, &Value::Int(i64::from(date.year)))
        .await?;
    debug!(year = date.year, node = %year.id, created = year.created, "year merged");
    let mut deepest = year.id;

    if let Some(m) = date.month {
        let month = backend
            .merge_child(tx, deepest, rels::CHILD, &[labels::MONTH], VALUE_KEY, &Value::Int(i64::from(m)))
            .await?;
        debug!(month = m, node = %month.id, created = month.created, "month merged");
        deepest = month.id;

        if let Some(d) = date.day {
            let day = backend
                .merge_child(tx, deepest, rels::CHILD, &[labels::DAY], VALUE_KEY, &Value::Int(i64::from(d)))
                .await?;
            debug!(day = d, node = %day.id, created = day.created, "day merged");
            deepest = day.id;
        }
    }

    encoding::merge_attr_link(backend, tx, target, deepest, attr_type).await?;
    debug!(target = %target, level = date.granularity().label(), node = %deepest, attr_type, "date attached");
    Ok(deepest)
}

/// Give every Year, Month and Day node without a display value one.
pub(crate) async fn sweep_in<B: StorageBackend>(backend: &B, tx: &mut B::Tx) -> Result<usize> {
    let mut filled = 0;
    for level in [labels::YEAR, labels::MONTH, labels::DAY] {
        for node in backend.nodes_by_label(&*tx, level).await? {
            if has_display(backend, &*tx, node.id).await? {
                continue;
            }
            let Some(label_text) = display_of(backend, &*tx, &node).await? else {
                debug!(node = %node.id, level, "time node without full ancestry skipped");
                continue;
            };
            for label in [labels::NODE, labels::ATTRIBUTE, labels::TIME] {
                if !node.has_label(label) {
                    backend.add_label(tx, node.id, label).await?;
                }
            }
            encoding::merge_prop_link(backend, tx, node.id, DISPLAY_KIND, &Value::from(label_text.as_str())).await?;
            debug!(node = %node.id, display = %label_text, "display materialized");
            filled += 1;
        }
    }
    Ok(filled)
}

async fn has_display<B: StorageBackend>(backend: &B, tx: &B::Tx, node: NodeId) -> Result<bool> {
    Ok(encoding::prop_links(backend, tx, node)
        .await?
        .iter()
        .any(|l| l.kind() == Some(DISPLAY_KIND)))
}

/// The value chain from `node` up to its Year, rendered innermost first.
async fn display_of<B: StorageBackend>(backend: &B, tx: &B::Tx, node: &Node) -> Result<Option<String>> {
    let mut parts = Vec::with_capacity(3);
    let mut current = node.clone();
    loop {
        let Some(value) = current.get(VALUE_KEY).and_then(Value::as_int) else {
            return Ok(None);
        };
        parts.push(value.to_string());
        if current.has_label(labels::YEAR) {
            return Ok(Some(parts.join("/")));
        }
        let parents = backend
            .get_relationships(tx, current.id, Direction::Incoming, Some(rels::CHILD))
            .await?;
        let Some(parent) = parents.first() else {
            return Ok(None);
        };
        current = require_node(backend, tx, parent.src).await?;
    }
}
