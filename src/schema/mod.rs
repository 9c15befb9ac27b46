//! # Schema vocabulary
//!
//! Names the graph encoding is built from, and the rules a client-supplied
//! label or property kind must pass before it reaches the store.
//!
//! Labels and kinds are structural (they select nodes) while values are data,
//! so the two never travel the same way: values go through as `Value`
//! parameters, names are checked here first.

pub mod hierarchy;

pub use hierarchy::{LabelHierarchy, infer_hierarchy};

use crate::{Error, Result};

/// Labels the encoding reserves for itself.
pub mod labels {
    pub const NODE: &str = "Node";
    pub const PROPERTY: &str = "Property";
    pub const LINK: &str = "Link";
    pub const PROP: &str = "Prop";
    pub const ATTR: &str = "Attr";
    pub const ATTRIBUTE: &str = "Attribute";
    pub const TIME: &str = "Time";
    pub const YEAR: &str = "Year";
    pub const MONTH: &str = "Month";
    pub const DAY: &str = "Day";
}

/// Relationship types.
pub mod rels {
    /// owner → link body
    pub const HAS: &str = "HAS";
    /// link body → value or attribute target
    pub const IS: &str = "IS";
    /// generic edge body on both sides
    pub const LINK: &str = "LINK";
    /// Year → Month → Day
    pub const CHILD: &str = "CHILD";
}

/// Field carrying the entity id in a serialized view.
pub const ID_KEY: &str = "id";
/// Node property holding a Property or time node's value.
pub const VALUE_KEY: &str = "value";
/// Node property on `Link:Attr` bodies naming the attribute relationship.
pub const TYPE_KEY: &str = "type";
/// Property kind of the cached human-readable time label.
pub const DISPLAY_KIND: &str = "display";

/// Payload keys that are directives rather than property kinds.
pub const RESERVED_KEYS: &[&str] = &[
    "create", "delete", "addAttrs", "delAttrs", "source", "target", "reverse", "labels",
];

/// Labels a client may never assign. `Link` stays open for generic edge bodies.
pub const STRUCTURAL_LABELS: &[&str] = &[labels::PROPERTY, labels::PROP, labels::ATTR];

/// Names a property kind may never take: the entity id field of a view,
/// and every label the encoding gives its own nodes.
pub const RESERVED_KINDS: &[&str] = &[
    ID_KEY,
    labels::NODE,
    labels::PROPERTY,
    labels::LINK,
    labels::PROP,
    labels::ATTR,
    labels::ATTRIBUTE,
    labels::TIME,
    labels::YEAR,
    labels::MONTH,
    labels::DAY,
];

/// Check the identifier grammar: `[A-Za-z_][A-Za-z0-9_]*`, bounded length.
pub fn validate_name(name: &str, max_len: usize) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::InvalidIdentifier("empty name".into()));
    };
    if name.len() > max_len {
        return Err(Error::InvalidIdentifier(format!(
            "'{name}' is longer than {max_len} bytes"
        )));
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(Error::InvalidIdentifier(format!(
            "'{name}' must start with a letter or '_'"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(Error::InvalidIdentifier(format!(
            "'{name}' contains '{bad}'"
        )));
    }
    Ok(())
}

/// A label a client may put on a node it creates.
pub fn validate_label(name: &str, max_len: usize) -> Result<()> {
    validate_name(name, max_len)?;
    if STRUCTURAL_LABELS.contains(&name) {
        return Err(Error::InvalidIdentifier(format!("'{name}' is a structural label")));
    }
    Ok(())
}

/// A property kind a client may write.
pub fn validate_kind(name: &str, max_len: usize) -> Result<()> {
    validate_name(name, max_len)?;
    if RESERVED_KINDS.contains(&name) {
        return Err(Error::InvalidIdentifier(format!("'{name}' cannot be a property kind")));
    }
    if RESERVED_KEYS.contains(&name) {
        return Err(Error::InvalidIdentifier(format!("'{name}' is a reserved payload key")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_grammar() {
        assert!(validate_name("Person", 64).is_ok());
        assert!(validate_name("_tmp2", 64).is_ok());
        assert!(validate_name("", 64).is_err());
        assert!(validate_name("2fast", 64).is_err());
        assert!(validate_name("a b", 64).is_err());
        assert!(validate_name("n) DETACH DELETE (m", 64).is_err());
        assert!(validate_name("abcdef", 5).is_err());
    }

    #[test]
    fn test_reserved_names() {
        assert!(validate_label("Property", 64).is_err());
        assert!(validate_label("Attr", 64).is_err());
        assert!(validate_label("Link", 64).is_ok());
        assert!(validate_label("Attribute", 64).is_ok());
        assert!(validate_kind("create", 64).is_err());
        assert!(validate_kind("Link", 64).is_err());
        assert!(validate_kind("id", 64).is_err());
        assert!(validate_kind("Year", 64).is_err());
        assert!(validate_kind("name", 64).is_ok());
    }

    proptest! {
        #[test]
        fn grammar_accepts_identifiers(name in "[A-Za-z_][A-Za-z0-9_]{0,30}") {
            prop_assert!(validate_name(&name, 64).is_ok());
        }

        #[test]
        fn grammar_rejects_punctuation(prefix in "[a-z]{1,8}", bad in "[ :'\"(){}\\-.;]", suffix in "[a-z]{0,8}") {
            let name = format!("{prefix}{bad}{suffix}");
            prop_assert!(validate_name(&name, 64).is_err());
        }
    }
}
