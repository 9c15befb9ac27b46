//! Staged entity mutations.
//!
//! A client payload is a JSON object keyed by property kind plus a handful
//! of directive keys. Property values the client wants created are named by
//! negative temporary ids so that `create` entries in the same payload can
//! hang attributes off them before they exist. `Mutations` turns that into
//! an explicit batch: ordered steps, attachments that refer to staged
//! properties through a `LocalHandle`, and an optional edge reversal.
//!
//! ```rust
//! use attrgraph::model::mutation::{Mutations, PropertyRef, AttrTarget};
//! use attrgraph::model::NodeId;
//!
//! let mut batch = Mutations::new();
//! let name = batch.stage_property("name", "Ada");
//! batch.attach_to_property(PropertyRef::Staged(name), AttrTarget::Node(NodeId(7)), "source");
//! assert_eq!(batch.steps.len(), 1);
//! ```

use std::collections::HashSet;

use serde_json::Map;

use super::{DateSpec, NodeId, Value};
use crate::config::GraphConfig;
use crate::schema;
use crate::{Error, Result};

/// Client-scoped handle for a property created by this batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle(pub i64);

/// The property an attachment hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyRef {
    Existing(NodeId),
    Staged(LocalHandle),
}

/// What an attribute link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget {
    Node(NodeId),
    /// Indexed through the shared time tree.
    Date(DateSpec),
}

/// First-pass operation, applied in payload order.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Remove the property link to `pid`, or only the attribute link to
    /// `aid` hanging off it.
    DeleteProperty { pid: NodeId, aid: Option<NodeId> },
    AttachAttribute { target: AttrTarget, attr_type: String },
    DetachAttribute { aid: NodeId, attr_type: Option<String> },
    /// Confirm or replace the value held through Property `pid`.
    UpdateProperty { kind: String, pid: NodeId, value: Value },
    NewProperty { kind: String, handle: LocalHandle, value: Value },
}

/// Second-pass operation: attach an attribute to a property link.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAttachment {
    pub property: PropertyRef,
    pub target: AttrTarget,
    pub attr_type: String,
}

/// Flip `source → edge → target` into `target → edge → source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reverse {
    pub source: NodeId,
    pub target: NodeId,
}

/// A validated, staged mutation batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mutations {
    pub steps: Vec<Step>,
    pub attachments: Vec<PendingAttachment>,
    pub reverse: Option<Reverse>,
    next_handle: i64,
}

// ============================================================================
// Builder
// ============================================================================

impl Mutations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.attachments.is_empty() && self.reverse.is_none()
    }

    /// Stage a new property value; the handle names it for attachments.
    pub fn stage_property(&mut self, kind: &str, value: impl Into<Value>) -> LocalHandle {
        self.next_handle -= 1;
        let handle = LocalHandle(self.next_handle);
        self.steps.push(Step::NewProperty { kind: kind.to_string(), handle, value: value.into() });
        handle
    }

    pub fn update_property(&mut self, kind: &str, pid: NodeId, value: impl Into<Value>) -> &mut Self {
        self.steps.push(Step::UpdateProperty { kind: kind.to_string(), pid, value: value.into() });
        self
    }

    pub fn delete_property(&mut self, pid: NodeId) -> &mut Self {
        self.steps.push(Step::DeleteProperty { pid, aid: None });
        self
    }

    pub fn delete_property_attribute(&mut self, pid: NodeId, aid: NodeId) -> &mut Self {
        self.steps.push(Step::DeleteProperty { pid, aid: Some(aid) });
        self
    }

    pub fn attach(&mut self, target: AttrTarget, attr_type: &str) -> &mut Self {
        self.steps.push(Step::AttachAttribute { target, attr_type: attr_type.to_string() });
        self
    }

    pub fn detach(&mut self, aid: NodeId) -> &mut Self {
        self.steps.push(Step::DetachAttribute { aid, attr_type: None });
        self
    }

    pub fn attach_to_property(&mut self, property: PropertyRef, target: AttrTarget, attr_type: &str) -> &mut Self {
        self.attachments.push(PendingAttachment { property, target, attr_type: attr_type.to_string() });
        self
    }

    pub fn reverse(&mut self, source: NodeId, target: NodeId) -> &mut Self {
        self.reverse = Some(Reverse { source, target });
        self
    }

    /// Handles staged by `NewProperty` steps.
    pub fn staged_handles(&self) -> impl Iterator<Item = LocalHandle> + '_ {
        self.steps.iter().filter_map(|s| match s {
            Step::NewProperty { handle, .. } => Some(*handle),
            _ => None,
        })
    }

    /// Check names and handle references before anything is written.
    pub fn validate(&self, config: &GraphConfig) -> Result<()> {
        let mut staged = HashSet::new();
        for step in &self.steps {
            match step {
                Step::UpdateProperty { kind, value, .. } | Step::NewProperty { kind, value, .. } => {
                    schema::validate_kind(kind, config.max_identifier_len)?;
                    if value.is_null() {
                        return Err(Error::BadRequest(format!("null value for '{kind}'")));
                    }
                }
                _ => {}
            }
            if let Step::NewProperty { handle, .. } = step {
                if handle.0 >= 0 {
                    return Err(Error::BadRequest(format!("staged handle {} must be negative", handle.0)));
                }
                if !staged.insert(*handle) {
                    return Err(Error::BadRequest(format!("pid {} staged twice", handle.0)));
                }
            }
        }
        for attachment in &self.attachments {
            if let PropertyRef::Staged(handle) = attachment.property {
                if !staged.contains(&handle) {
                    return Err(Error::BadRequest(format!(
                        "create entry references pid {} which no entry stages",
                        handle.0
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// JSON payload parsing
// ============================================================================

impl Mutations {
    /// Parse a payload with the default configuration.
    pub fn from_json(payload: &serde_json::Value) -> Result<Self> {
        Self::from_json_with(payload, &GraphConfig::default())
    }

    /// Parse and validate a payload. Keys are processed in payload order.
    pub fn from_json_with(payload: &serde_json::Value, config: &GraphConfig) -> Result<Self> {
        let object = payload
            .as_object()
            .ok_or_else(|| Error::BadRequest("payload must be a JSON object".into()))?;

        let mut batch = Mutations::new();
        let prefix = config.date_prefix.as_str();

        for (key, entries) in object {
            match key.as_str() {
                "labels" | "source" | "target" => {}
                "reverse" => {
                    if truthy(entries) {
                        let source = scalar_id(object, "source")?;
                        let target = scalar_id(object, "target")?;
                        batch.reverse = Some(Reverse { source, target });
                    }
                }
                "delete" => {
                    for entry in entry_list(key, entries)? {
                        let entry = entry_object(key, entry)?;
                        let pid = node_id(field(key, entry, "pid")?, "pid")?;
                        let aid = entry.get("aid").filter(|v| !v.is_null()).map(|v| node_id(v, "aid")).transpose()?;
                        batch.steps.push(Step::DeleteProperty { pid, aid });
                    }
                }
                "addAttrs" => {
                    for entry in entry_list(key, entries)? {
                        let entry = entry_object(key, entry)?;
                        let target = attr_target(field(key, entry, "aid")?, prefix)?;
                        let attr_type = text(field(key, entry, "type")?, "type")?;
                        batch.steps.push(Step::AttachAttribute { target, attr_type });
                    }
                }
                "delAttrs" => {
                    for entry in entry_list(key, entries)? {
                        let step = match entry {
                            serde_json::Value::Object(obj) => Step::DetachAttribute {
                                aid: node_id(field(key, obj, "aid")?, "aid")?,
                                attr_type: obj.get("type").map(|t| text(t, "type")).transpose()?,
                            },
                            other => Step::DetachAttribute { aid: node_id(other, "aid")?, attr_type: None },
                        };
                        batch.steps.push(step);
                    }
                }
                "create" => {
                    for entry in entry_list(key, entries)? {
                        let entry = entry_object(key, entry)?;
                        let pid = signed(field(key, entry, "pid")?, "pid")?;
                        // Entries without an attribute only confirm the property.
                        let Some(aid) = entry.get("aid").filter(|v| !v.is_null()) else { continue };
                        let property = if pid < 0 {
                            PropertyRef::Staged(LocalHandle(pid))
                        } else {
                            PropertyRef::Existing(NodeId(pid as u64))
                        };
                        batch.attachments.push(PendingAttachment {
                            property,
                            target: attr_target(aid, prefix)?,
                            attr_type: text(field(key, entry, "type")?, "type")?,
                        });
                    }
                }
                kind => {
                    for entry in entry_list(kind, entries)? {
                        let entry = entry_object(kind, entry)?;
                        let pid = signed(field(kind, entry, "pid")?, "pid")?;
                        let value = Value::from(field(kind, entry, "value")?);
                        let step = if pid < 0 {
                            Step::NewProperty { kind: kind.to_string(), handle: LocalHandle(pid), value }
                        } else {
                            Step::UpdateProperty { kind: kind.to_string(), pid: NodeId(pid as u64), value }
                        };
                        batch.steps.push(step);
                    }
                }
            }
        }

        batch.next_handle = batch.staged_handles().map(|h| h.0).min().unwrap_or(0).min(0);
        batch.validate(config)?;
        Ok(batch)
    }
}

fn truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty() && s != "0",
        _ => true,
    }
}

fn entry_list<'a>(key: &str, v: &'a serde_json::Value) -> Result<&'a Vec<serde_json::Value>> {
    v.as_array()
        .ok_or_else(|| Error::BadRequest(format!("'{key}' must be a list of entries")))
}

fn entry_object<'a>(key: &str, v: &'a serde_json::Value) -> Result<&'a Map<String, serde_json::Value>> {
    v.as_object()
        .ok_or_else(|| Error::BadRequest(format!("entries under '{key}' must be objects")))
}

fn field<'a>(key: &str, entry: &'a Map<String, serde_json::Value>, name: &str) -> Result<&'a serde_json::Value> {
    entry
        .get(name)
        .ok_or_else(|| Error::BadRequest(format!("entry under '{key}' is missing '{name}'")))
}

fn signed(v: &serde_json::Value, name: &str) -> Result<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| Error::BadRequest(format!("'{name}' must be an integer, got {v}")))
}

fn node_id(v: &serde_json::Value, name: &str) -> Result<NodeId> {
    let raw = signed(v, name)?;
    u64::try_from(raw)
        .map(NodeId)
        .map_err(|_| Error::BadRequest(format!("'{name}' must reference an existing node, got {raw}")))
}

fn scalar_id(object: &Map<String, serde_json::Value>, name: &str) -> Result<NodeId> {
    let v = object
        .get(name)
        .ok_or_else(|| Error::BadRequest(format!("'reverse' requires '{name}'")))?;
    node_id(v, name)
}

fn text(v: &serde_json::Value, name: &str) -> Result<String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::BadRequest(format!("'{name}' must be a string")))
}

fn attr_target(v: &serde_json::Value, date_prefix: &str) -> Result<AttrTarget> {
    if let Some(s) = v.as_str() {
        if let Some(spec) = s.strip_prefix(date_prefix).and_then(|rest| rest.strip_prefix(':')) {
            return Ok(AttrTarget::Date(spec.parse()?));
        }
    }
    node_id(v, "aid").map(AttrTarget::Node)
}
