//! Degree-of-interest subgraphs.
//!
//! Extraction itself lives outside this crate behind `SubgraphExtractor`.
//! The service only mints the graph id, names the mode and hands the seed
//! over.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::model::NodeId;
use crate::Result;

/// Which extraction to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DoiMode {
    Complete,
    UsersToUsers,
}

impl DoiMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DoiMode::Complete => "complete",
            DoiMode::UsersToUsers => "usersToUsers",
        }
    }
}

impl fmt::Display for DoiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External subgraph extraction.
#[async_trait]
pub trait SubgraphExtractor: Send + Sync {
    /// Build the subgraph for `seed_id` under `graph_id`.
    async fn create(&self, mode: DoiMode, graph_id: Uuid, seed_type: &str, seed_id: NodeId) -> Result<()>;
}

/// DOI operations over one extractor.
pub struct DoiService<'g, S: SubgraphExtractor> {
    extractor: &'g S,
}

impl<'g, S: SubgraphExtractor> DoiService<'g, S> {
    pub fn new(extractor: &'g S) -> Self {
        Self { extractor }
    }

    /// Full degree-of-interest subgraph around the seed.
    pub async fn compute_doi(&self, seed_type: &str, seed_id: NodeId) -> Result<String> {
        self.compute(DoiMode::Complete, seed_type, seed_id).await
    }

    /// User-to-user projection around the seed.
    pub async fn compute_user_doi(&self, seed_type: &str, seed_id: NodeId) -> Result<String> {
        self.compute(DoiMode::UsersToUsers, seed_type, seed_id).await
    }

    /// Returns the new graph id, hyphenated.
    pub async fn compute(&self, mode: DoiMode, seed_type: &str, seed_id: NodeId) -> Result<String> {
        let graph_id = Uuid::new_v4();
        self.extractor.create(mode, graph_id, seed_type, seed_id).await?;
        info!(%mode, %graph_id, seed_type, seed = %seed_id, "doi subgraph requested");
        Ok(graph_id.hyphenated().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(DoiMode, Uuid, String, NodeId)>>,
    }

    #[async_trait]
    impl SubgraphExtractor for Recorder {
        async fn create(&self, mode: DoiMode, graph_id: Uuid, seed_type: &str, seed_id: NodeId) -> Result<()> {
            self.calls.lock().push((mode, graph_id, seed_type.to_string(), seed_id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_modes_and_ids() {
        let recorder = Recorder::default();
        let service = DoiService::new(&recorder);

        let a = service.compute_doi("Person", NodeId(3)).await.unwrap();
        let b = service.compute_user_doi("Person", NodeId(3)).await.unwrap();

        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.to_string(), "complete");
        assert_eq!(calls[1].0.to_string(), "usersToUsers");
        assert_eq!(calls[0].1.to_string(), a);
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
