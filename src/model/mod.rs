//! # Property Graph Model
//!
//! DTOs shared by storage, reader, writer and time tree.
//! This module is pure data: no I/O, no state, no async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod date;
pub mod entity;
pub mod mutation;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, Direction};
pub use value::Value;
pub use property_map::{PropertyMap, props};
pub use date::{DateSpec, Granularity};
pub use entity::{AttrRef, AttributeEntries, EntityView, HeldValue, HydratedAttribute, PropertyEntry};
pub use mutation::{AttrTarget, LocalHandle, Mutations, PendingAttachment, PropertyRef, Reverse, Step};
