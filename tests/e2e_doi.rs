//! End-to-end tests for degree-of-interest requests.

use async_trait::async_trait;
use attrgraph::{DoiMode, Error, Graph, Mutations, NodeId, Result, SubgraphExtractor};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use uuid::Uuid;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(DoiMode, Uuid, String, NodeId)>>,
}

#[async_trait]
impl SubgraphExtractor for Recorder {
    async fn create(&self, mode: DoiMode, graph_id: Uuid, seed_type: &str, seed_id: NodeId) -> Result<()> {
        self.seen.lock().push((mode, graph_id, seed_type.to_string(), seed_id));
        Ok(())
    }
}

struct Unavailable;

#[async_trait]
impl SubgraphExtractor for Unavailable {
    async fn create(&self, _: DoiMode, _: Uuid, _: &str, _: NodeId) -> Result<()> {
        Err(Error::StorageError("extractor offline".into()))
    }
}

#[tokio::test]
async fn test_compute_returns_the_minted_graph_id() {
    let graph = Graph::open_memory().await.unwrap();
    let seed = graph.writer().create_node(&["Person"], &Mutations::new()).await.unwrap();
    let recorder = Recorder::default();

    let complete = graph.doi(&recorder).compute_doi("Person", seed).await.unwrap();
    let users = graph.doi(&recorder).compute_user_doi("Person", seed).await.unwrap();

    let seen = recorder.seen.lock();
    assert_eq!(seen[0].0, DoiMode::Complete);
    assert_eq!(seen[1].0, DoiMode::UsersToUsers);
    assert_eq!(Uuid::parse_str(&complete).unwrap(), seen[0].1);
    assert_eq!(Uuid::parse_str(&users).unwrap(), seen[1].1);
    assert_eq!((seen[0].2.as_str(), seen[0].3), ("Person", seed));
}

#[tokio::test]
async fn test_extractor_failure_propagates() {
    let graph = Graph::open_memory().await.unwrap();
    let err = graph.doi(&Unavailable).compute_doi("Person", NodeId(1)).await.unwrap_err();
    assert_eq!(err.status(), 500);
}
