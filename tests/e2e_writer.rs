//! End-to-end tests for the entity writer.
//!
//! Each test drives `Graph::open_memory()` through the writer and checks the
//! resulting encoding with the reader or the raw backend.

use attrgraph::model::{AttrTarget, PropertyRef};
use attrgraph::{Graph, MemoryBackend, Mutations, NodeId, StorageBackend, TxMode, Value};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn graph() -> Graph<MemoryBackend> {
    Graph::open_memory().await.unwrap()
}

async fn person(graph: &Graph<MemoryBackend>, name: &str) -> NodeId {
    let mut batch = Mutations::new();
    batch.stage_property("name", name);
    graph.writer().create_node(&["Person"], &batch).await.unwrap()
}

/// Every Property node of `kind` holding `value`.
async fn properties(graph: &Graph<MemoryBackend>, kind: &str, value: &str) -> Vec<NodeId> {
    let db = graph.backend();
    let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
    db.nodes_by_label(&tx, kind)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.has_label("Property") && n.get("value") == Some(&Value::from(value)))
        .map(|n| n.id)
        .collect()
}

async fn pid_of(graph: &Graph<MemoryBackend>, id: NodeId, kind: &str) -> NodeId {
    let view = graph.reader().get_by_id(id, &[kind], &[], false).await.unwrap();
    view.property(kind).unwrap()[0].pid
}

async fn counts(graph: &Graph<MemoryBackend>) -> (u64, u64) {
    let db = graph.backend();
    let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
    (db.node_count(&tx).await.unwrap(), db.relationship_count(&tx).await.unwrap())
}

// ============================================================================
// Round trip
// ============================================================================

#[tokio::test]
async fn test_create_then_get_round_trip() {
    let graph = graph().await;
    let payload = json!({"name": [{"pid": -1, "value": "a"}]});
    let batch = Mutations::from_json(&payload).unwrap();

    let id = graph.writer().create_node(&["X"], &batch).await.unwrap();
    let view = graph.reader().get_by_id(id, &["name"], &[], false).await.unwrap();

    assert_eq!(view.values("name"), vec![&Value::from("a")]);
    let pid = view.property("name").unwrap()[0].pid;
    assert_eq!(properties(&graph, "name", "a").await, vec![pid]);
    assert_eq!(
        serde_json::to_value(&view).unwrap(),
        json!({"id": id.0, "name": [{"pid": pid.0, "value": "a"}]})
    );
}

#[tokio::test]
async fn test_unchanged_value_is_a_no_op() {
    let graph = graph().await;
    let id = person(&graph, "a").await;
    let pid = pid_of(&graph, id, "name").await;
    let before = counts(&graph).await;

    let payload = json!({"name": [{"pid": pid.0, "value": "a"}]});
    let summary = graph
        .writer()
        .set_by_id(id, &Mutations::from_json(&payload).unwrap())
        .await
        .unwrap();

    assert_eq!(summary.properties_linked + summary.properties_unlinked, 0);
    assert_eq!(pid_of(&graph, id, "name").await, pid);
    assert_eq!(counts(&graph).await, before);
}

// ============================================================================
// Property dedup
// ============================================================================

#[tokio::test]
async fn test_same_value_shares_one_property() {
    let graph = graph().await;
    let a = person(&graph, "Ada").await;
    let b = person(&graph, "Ada").await;

    let shared = properties(&graph, "name", "Ada").await;
    assert_eq!(shared.len(), 1);
    assert_eq!(pid_of(&graph, a, "name").await, shared[0]);
    assert_eq!(pid_of(&graph, b, "name").await, shared[0]);
}

#[tokio::test]
async fn test_concurrent_writers_share_one_property() {
    let graph = graph().await;
    let mut handles = Vec::new();
    for _ in 0..16 {
        let graph = graph.clone();
        handles.push(tokio::spawn(async move {
            let mut batch = Mutations::new();
            batch.stage_property("name", "Ada");
            graph.writer().create_node(&["Person"], &batch).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(properties(&graph, "name", "Ada").await.len(), 1);
    let held = graph.reader().property_values_and_ids("Person", "name").await.unwrap();
    assert_eq!(held.len(), 16);
}

#[tokio::test]
async fn test_same_value_of_other_kind_is_separate() {
    let graph = graph().await;
    let mut batch = Mutations::new();
    batch.stage_property("name", "Lovelace");
    batch.stage_property("surname", "Lovelace");
    let id = graph.writer().create_node(&["Person"], &batch).await.unwrap();

    let view = graph.reader().get_by_id(id, &["*"], &[], false).await.unwrap();
    assert_ne!(view.property("name").unwrap()[0].pid, view.property("surname").unwrap()[0].pid);
}

// ============================================================================
// Update and delete
// ============================================================================

#[tokio::test]
async fn test_update_replaces_link_and_keeps_shared_property() {
    let graph = graph().await;
    let a = person(&graph, "a").await;
    let b = person(&graph, "a").await;
    let p = pid_of(&graph, a, "name").await;

    let mut batch = Mutations::new();
    batch.update_property("name", p, "b");
    graph.writer().set_by_id(a, &batch).await.unwrap();

    let view = graph.reader().get_by_id(a, &["name"], &[], false).await.unwrap();
    assert_eq!(view.values("name"), vec![&Value::from("b")]);
    assert_ne!(view.property("name").unwrap()[0].pid, p);
    assert_eq!(properties(&graph, "name", "a").await, vec![p]);
    assert_eq!(pid_of(&graph, b, "name").await, p);

    // The last holder moves away: P goes.
    let mut batch = Mutations::new();
    batch.update_property("name", p, "c");
    let summary = graph.writer().set_by_id(b, &batch).await.unwrap();
    assert_eq!(summary.orphans_collected, 1);
    assert!(properties(&graph, "name", "a").await.is_empty());
}

#[tokio::test]
async fn test_update_to_existing_value_reuses_it() {
    let graph = graph().await;
    let a = person(&graph, "a").await;
    let b = person(&graph, "b").await;
    let pa = pid_of(&graph, a, "name").await;
    let pb = pid_of(&graph, b, "name").await;

    let mut batch = Mutations::new();
    batch.update_property("name", pa, "b");
    graph.writer().set_by_id(a, &batch).await.unwrap();

    assert_eq!(pid_of(&graph, a, "name").await, pb);
    assert!(properties(&graph, "name", "a").await.is_empty());
}

#[tokio::test]
async fn test_update_with_wrong_kind_is_not_found() {
    let graph = graph().await;
    let a = person(&graph, "a").await;
    let p = pid_of(&graph, a, "name").await;

    let mut batch = Mutations::new();
    batch.update_property("age", p, "b");
    let err = graph.writer().set_by_id(a, &batch).await.unwrap_err();
    assert!(matches!(err, attrgraph::Error::NotFound(_)));
}

#[tokio::test]
async fn test_delete_property_link() {
    let graph = graph().await;
    let a = person(&graph, "a").await;
    let p = pid_of(&graph, a, "name").await;

    let payload = json!({"delete": [{"pid": p.0}]});
    graph.writer().set_by_id(a, &Mutations::from_json(&payload).unwrap()).await.unwrap();

    let view = graph.reader().get_by_id(a, &[], &[], false).await.unwrap();
    assert!(view.properties.is_empty());
    assert!(properties(&graph, "name", "a").await.is_empty());
}

#[tokio::test]
async fn test_delete_by_id_collects_exclusive_properties_only() {
    let graph = graph().await;
    let mut batch = Mutations::new();
    batch.stage_property("name", "shared");
    batch.stage_property("nickname", "mine");
    let a = graph.writer().create_node(&["Person"], &batch).await.unwrap();
    let b = person(&graph, "shared").await;

    let summary = graph.writer().delete_by_id(a).await.unwrap();

    assert_eq!(summary.properties_unlinked, 2);
    assert_eq!(summary.orphans_collected, 1);
    assert!(properties(&graph, "nickname", "mine").await.is_empty());
    assert_eq!(properties(&graph, "name", "shared").await.len(), 1);
    assert_eq!(pid_of(&graph, b, "name").await, properties(&graph, "name", "shared").await[0]);
    assert!(graph.reader().labels_of(a).await.is_err());
}

#[tokio::test]
async fn test_delete_by_id_removes_incoming_attribute_links() {
    let graph = graph().await;
    let place = graph.writer().create_node(&["Place", "Attribute"], &Mutations::new()).await.unwrap();
    let mut batch = Mutations::new();
    batch.attach(AttrTarget::Node(place), "livesIn");
    let ada = graph.writer().create_node(&["Person"], &batch).await.unwrap();

    graph.writer().delete_by_id(place).await.unwrap();

    let view = graph.reader().get_by_id(ada, &[], &["*"], false).await.unwrap();
    assert!(view.attributes.is_empty());
    assert!(graph.reader().attribute_type_catalog().await.unwrap().is_empty());
}

// ============================================================================
// Attributes on properties (second pass)
// ============================================================================

#[tokio::test]
async fn test_create_entries_resolve_staged_pids() {
    let graph = graph().await;
    let source = graph.writer().create_node(&["Document", "Attribute"], &Mutations::new()).await.unwrap();

    let payload = json!({
        "create": [{"pid": -1, "aid": source.0, "type": "citedIn"}],
        "name": [{"pid": -1, "value": "Ada"}],
    });
    let id = graph
        .writer()
        .create_node(&["Person"], &Mutations::from_json(&payload).unwrap())
        .await
        .unwrap();

    let view = graph.reader().get_by_id(id, &["name"], &[], false).await.unwrap();
    let entry = &view.property("name").unwrap()[0];
    assert_eq!(entry.attrs.len(), 1);
    assert_eq!(entry.attrs[0].aid, source);
    assert_eq!(entry.attrs[0].attr_type, "citedIn");
}

#[tokio::test]
async fn test_delete_only_the_property_attribute() {
    let graph = graph().await;
    let source = graph.writer().create_node(&["Document", "Attribute"], &Mutations::new()).await.unwrap();
    let mut batch = Mutations::new();
    let name = batch.stage_property("name", "Ada");
    batch.attach_to_property(PropertyRef::Staged(name), AttrTarget::Node(source), "citedIn");
    let id = graph.writer().create_node(&["Person"], &batch).await.unwrap();
    let pid = pid_of(&graph, id, "name").await;

    let mut batch = Mutations::new();
    batch.delete_property_attribute(pid, source);
    graph.writer().set_by_id(id, &batch).await.unwrap();

    let view = graph.reader().get_by_id(id, &["name"], &[], false).await.unwrap();
    assert_eq!(view.property("name").unwrap()[0].pid, pid);
    assert!(view.property("name").unwrap()[0].attrs.is_empty());
    assert!(graph.reader().labels_of(source).await.is_ok());
}

#[tokio::test]
async fn test_attachment_to_unheld_property_rolls_back() {
    let graph = graph().await;
    let other = person(&graph, "Grace").await;
    let foreign = pid_of(&graph, other, "name").await;
    let source = graph.writer().create_node(&["Document", "Attribute"], &Mutations::new()).await.unwrap();
    let before = counts(&graph).await;

    let mut batch = Mutations::new();
    batch.stage_property("name", "Ada");
    batch.attach_to_property(PropertyRef::Existing(foreign), AttrTarget::Node(source), "citedIn");
    let err = graph.writer().create_node(&["Person"], &batch).await.unwrap_err();

    assert!(matches!(err, attrgraph::Error::NotFound(_)));
    assert_eq!(counts(&graph).await, before);
    assert!(properties(&graph, "name", "Ada").await.is_empty());
}

// ============================================================================
// Entity attributes
// ============================================================================

#[tokio::test]
async fn test_add_and_remove_attribute() {
    let graph = graph().await;
    let place = graph.writer().create_node(&["Place", "Attribute"], &Mutations::new()).await.unwrap();
    let ada = person(&graph, "Ada").await;

    let payload = json!({"addAttrs": [{"aid": place.0, "type": "livesIn"}]});
    graph.writer().set_by_id(ada, &Mutations::from_json(&payload).unwrap()).await.unwrap();
    graph.writer().set_by_id(ada, &Mutations::from_json(&payload).unwrap()).await.unwrap();

    let view = graph.reader().get_by_id(ada, &[], &["Place"], false).await.unwrap();
    assert_eq!(view.attribute("Place").unwrap().ids(), vec![place]);
    assert_eq!(graph.reader().attribute_type_catalog().await.unwrap(), vec!["livesIn"]);

    let payload = json!({"delAttrs": [place.0]});
    let summary = graph.writer().set_by_id(ada, &Mutations::from_json(&payload).unwrap()).await.unwrap();
    assert_eq!(summary.attributes_detached, 1);

    let view = graph.reader().get_by_id(ada, &[], &["Place"], false).await.unwrap();
    assert!(view.attribute("Place").is_none());
    assert!(graph.reader().labels_of(place).await.is_ok());
}

#[tokio::test]
async fn test_bad_payload_is_rejected_before_writing() {
    let graph = graph().await;
    let ada = person(&graph, "Ada").await;
    let before = counts(&graph).await;

    let missing_value = json!({"name": [{"pid": -1}]});
    let err = Mutations::from_json(&missing_value).unwrap_err();
    assert_eq!(err.status(), 400);

    let mut batch = Mutations::new();
    batch.stage_property("bad kind", "x");
    let err = graph.writer().set_by_id(ada, &batch).await.unwrap_err();
    assert!(matches!(err, attrgraph::Error::InvalidIdentifier(_)));
    assert_eq!(counts(&graph).await, before);
}

// ============================================================================
// Names and generic edges
// ============================================================================

#[tokio::test]
async fn test_id_is_not_a_property_kind() {
    let graph = graph().await;
    let payload = json!({"id": [{"pid": -1, "value": "x"}]});
    let err = Mutations::from_json(&payload).unwrap_err();
    assert!(matches!(err, attrgraph::Error::InvalidIdentifier(_)));

    let mut batch = Mutations::new();
    batch.stage_property("id", "x");
    let err = graph.writer().create_node(&["Person"], &batch).await.unwrap_err();
    assert_eq!(err.status(), 400);

    let ada = person(&graph, "Ada").await;
    let view = graph.reader().get_by_id(ada, &["*"], &["*"], false).await.unwrap();
    assert_eq!(serde_json::to_value(&view).unwrap()["id"], json!(ada.0));
}

#[tokio::test]
async fn test_property_and_attribute_kinds_stay_apart() {
    let graph = graph().await;
    graph.writer().create_node(&["Place", "Attribute"], &Mutations::new()).await.unwrap();
    let ada = person(&graph, "Ada").await;
    let before = counts(&graph).await;

    let mut batch = Mutations::new();
    batch.stage_property("Place", "London");
    let err = graph.writer().set_by_id(ada, &batch).await.unwrap_err();
    assert!(matches!(err, attrgraph::Error::InvalidIdentifier(_)));

    let err = graph.writer().create_node(&["name", "Attribute"], &Mutations::new()).await.unwrap_err();
    assert!(matches!(err, attrgraph::Error::InvalidIdentifier(_)));
    assert_eq!(counts(&graph).await, before);

    // Without the Attribute marker the label is an ordinary entity type.
    assert!(graph.writer().create_node(&["name"], &Mutations::new()).await.is_ok());
}

#[tokio::test]
async fn test_link_labelled_edge_body() {
    let graph = graph().await;
    let ada = person(&graph, "Ada").await;
    let grace = person(&graph, "Grace").await;
    let edge = graph.writer().create_node(&["Link", "Acquaintance"], &Mutations::new()).await.unwrap();

    graph.writer().create_edge(ada, edge, grace).await.unwrap();

    let db = graph.backend();
    let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
    let inbound = db.get_relationships(&tx, edge, attrgraph::Direction::Incoming, None).await.unwrap();
    let outbound = db.get_relationships(&tx, edge, attrgraph::Direction::Outgoing, None).await.unwrap();
    assert_eq!((inbound[0].src, inbound[0].rel_type.as_str()), (ada, "LINK"));
    assert_eq!((outbound[0].dst, outbound[0].rel_type.as_str()), (grace, "LINK"));

    assert!(graph.reader().co_labels("Link").await.unwrap().contains(&"Acquaintance".to_string()));
}
