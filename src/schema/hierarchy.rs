//! Label hierarchy inference.
//!
//! Turns label co-occurrence into a nested type tree. A label carried by
//! more nodes is taken as more general than one carried by fewer, so each
//! observed label set is threaded into the tree from its most common label
//! down to its rarest. Sets whose labels all share one count cannot be
//! ordered that way: a single label becomes a top-level type, several land
//! in their own `ungroupable-N` bucket.
//!
//! Counts are compared for strict equality only. Near-equal counts are
//! ordered like any others.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use smallvec::SmallVec;

/// One distinct label combination, sorted and deduplicated.
pub type LabelSet = SmallVec<[String; 4]>;

/// Nested label tree; leaves are empty maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelHierarchy(pub BTreeMap<String, LabelHierarchy>);

impl LabelHierarchy {
    pub fn get(&self, label: &str) -> Option<&LabelHierarchy> {
        self.0.get(label)
    }

    /// Follow a path of labels from the root.
    pub fn path(&self, path: &[&str]) -> Option<&LabelHierarchy> {
        path.iter().try_fold(self, |node, label| node.get(label))
    }

    fn entry(&mut self, label: &str) -> &mut LabelHierarchy {
        self.0.entry(label.to_string()).or_default()
    }
}

/// Canonical form of a node's labels.
pub fn label_set<'a>(labels: impl IntoIterator<Item = &'a String>) -> LabelSet {
    let mut set: LabelSet = labels.into_iter().cloned().collect();
    set.sort();
    set.dedup();
    set
}

/// Per-label node counts and distinct label sets in discovery order.
///
/// `label_lists` yields each node's labels, in the order nodes are scanned.
pub fn label_statistics<'a>(
    label_lists: impl IntoIterator<Item = &'a [String]>,
) -> (HashMap<String, u64>, Vec<LabelSet>) {
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut sets: Vec<LabelSet> = Vec::new();
    for labels in label_lists {
        let set = label_set(labels);
        for label in &set {
            *counts.entry(label.clone()).or_default() += 1;
        }
        if !set.is_empty() && !sets.contains(&set) {
            sets.push(set);
        }
    }
    (counts, sets)
}

/// Build the hierarchy from label counts and the distinct label sets.
pub fn infer_hierarchy(counts: &HashMap<String, u64>, label_sets: &[LabelSet]) -> LabelHierarchy {
    let count = |label: &String| counts.get(label).copied().unwrap_or(0);
    let mut root = LabelHierarchy::default();
    let mut ungroupable = 0usize;

    for set in label_sets {
        let Some(first) = set.first() else { continue };
        let reference = count(first);

        if set.iter().all(|label| count(label) == reference) {
            if set.len() == 1 {
                root.entry(first);
            } else {
                let bucket = root.entry(&format!("ungroupable-{ungroupable}"));
                for label in set {
                    bucket.entry(label);
                }
                ungroupable += 1;
            }
            continue;
        }

        let mut chain: Vec<&String> = set.iter().collect();
        chain.sort_by(|a, b| count(*b).cmp(&count(*a)));
        let mut cursor = &mut root;
        for label in chain {
            cursor = cursor.entry(label);
        }
    }

    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn set(labels: &[&str]) -> LabelSet {
        let owned: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        label_set(&owned)
    }

    fn counts(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(l, c)| (l.to_string(), *c)).collect()
    }

    #[test]
    fn test_equal_counts_are_siblings_lower_count_is_child() {
        let counts = counts(&[("A", 10), ("B", 10), ("C", 3)]);
        let sets = vec![set(&["A"]), set(&["B"]), set(&["A", "C"])];
        let h = infer_hierarchy(&counts, &sets);

        assert_eq!(
            serde_json::to_value(&h).unwrap(),
            serde_json::json!({"A": {"C": {}}, "B": {}})
        );
        assert!(h.get("C").is_none());
    }

    #[test]
    fn test_single_label_does_not_clobber_children() {
        let counts = counts(&[("A", 10), ("C", 3)]);
        let sets = vec![set(&["A", "C"]), set(&["A"])];
        let h = infer_hierarchy(&counts, &sets);
        assert!(h.path(&["A", "C"]).is_some());
    }

    #[test]
    fn test_ungroupable_buckets_numbered_in_discovery_order() {
        let counts = counts(&[("X", 2), ("Y", 2), ("P", 5), ("Q", 5)]);
        let sets = vec![set(&["X", "Y"]), set(&["P", "Q"])];
        let h = infer_hierarchy(&counts, &sets);

        assert_eq!(
            serde_json::to_value(&h).unwrap(),
            serde_json::json!({
                "ungroupable-0": {"X": {}, "Y": {}},
                "ungroupable-1": {"P": {}, "Q": {}}
            })
        );
    }

    #[test]
    fn test_chains_share_prefixes() {
        let counts = counts(&[("Node", 20), ("Link", 8), ("Prop", 5), ("Attr", 3)]);
        let sets = vec![
            set(&["Node", "Link", "Prop"]),
            set(&["Node", "Link", "Attr"]),
        ];
        let h = infer_hierarchy(&counts, &sets);

        assert_eq!(
            serde_json::to_value(&h).unwrap(),
            serde_json::json!({"Node": {"Link": {"Attr": {}, "Prop": {}}}})
        );
    }

    #[test]
    fn test_label_statistics() {
        let nodes: Vec<Vec<String>> = vec![
            vec!["A".into()],
            vec!["C".into(), "A".into()],
            vec!["A".into(), "C".into()],
            vec![],
        ];
        let (counts, sets) = label_statistics(nodes.iter().map(Vec::as_slice));
        assert_eq!(counts["A"], 3);
        assert_eq!(counts["C"], 2);
        assert_eq!(sets, vec![set(&["A"]), set(&["A", "C"])]);
    }

    fn edges(h: &LabelHierarchy, parent: Option<&str>, out: &mut Vec<(String, String)>) {
        for (label, child) in &h.0 {
            if let Some(p) = parent {
                out.push((p.to_string(), label.clone()));
            }
            edges(child, Some(label.as_str()), out);
        }
    }

    proptest! {
        #[test]
        fn chain_edges_never_point_to_more_general_labels(
            raw in prop::collection::vec(prop::collection::vec(0usize..6, 1..4), 1..10)
        ) {
            let names = ["A", "B", "C", "D", "E", "F"];
            let nodes: Vec<Vec<String>> = raw
                .iter()
                .map(|ls| ls.iter().map(|i| names[*i].to_string()).collect())
                .collect();
            let (counts, sets) = label_statistics(nodes.iter().map(Vec::as_slice));
            let h = infer_hierarchy(&counts, &sets);

            let mut all = Vec::new();
            edges(&h, None, &mut all);
            for (parent, child) in all {
                if parent.starts_with("ungroupable-") {
                    continue;
                }
                prop_assert!(counts[&parent] >= counts[&child]);
            }
            for set in &sets {
                for label in set {
                    let mut seen = Vec::new();
                    edges(&h, None, &mut seen);
                    let present = h.get(label).is_some() || seen.iter().any(|(_, c)| c == label);
                    prop_assert!(present);
                }
            }
        }
    }
}
