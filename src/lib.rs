//! # attrgraph: Entity/Attribute Layer over a Property Graph
//!
//! Maps a generic entity/property/attribute abstraction onto a concrete
//! property-graph encoding and keeps that encoding consistent: shared
//! deduplicated Property nodes, typed attribute links, a shared
//! Year→Month→Day time tree and label-hierarchy inference.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` is the contract between the entity layer and storage
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Value` cross all boundaries
//! 3. **Staged payloads**: client diffs become `Mutations` before anything is written
//! 4. **One call, one transaction**: every operation commits or rolls back as a whole
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use attrgraph::{Graph, Mutations};
//!
//! # async fn example() -> attrgraph::Result<()> {
//! let graph = Graph::open_memory().await?;
//!
//! let mut batch = Mutations::new();
//! batch.stage_property("name", "Ada");
//! let id = graph.writer().create_node(&["Person"], &batch).await?;
//!
//! let view = graph.reader().get_by_id(id, &["name"], &[], false).await?;
//! println!("{}", serde_json::to_string(&view).unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | (default) | In-memory graph with undo-journaled transactions |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod schema;
pub mod storage;
pub mod tx;
pub mod config;
pub mod encoding;
pub mod reader;
pub mod writer;
pub mod timetree;
pub mod doi;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap,
    NodeId, RelId, Direction,
    DateSpec, EntityView, Mutations,
};

// ============================================================================
// Re-exports: Components
// ============================================================================

pub use config::GraphConfig;
pub use doi::{DoiMode, DoiService, SubgraphExtractor};
pub use reader::EntityReader;
pub use schema::LabelHierarchy;
pub use storage::{StorageBackend, BackendConfig, MemoryBackend};
pub use timetree::TimeTree;
pub use tx::{Transaction, TxMode, TxId};
pub use writer::EntityWriter;

// ============================================================================
// Top-level Graph handle
// ============================================================================

/// The primary entry point. A `Graph` wraps a storage backend and hands out
/// the reader, writer and time-tree components. It holds no state between
/// calls besides the backend and its configuration.
#[derive(Clone)]
pub struct Graph<B: StorageBackend> {
    backend: B,
    config: GraphConfig,
}

impl<B: StorageBackend> Graph<B> {
    /// Create a Graph with the given backend and default configuration.
    pub fn with_backend(backend: B) -> Self {
        Self::with_config(backend, GraphConfig::default())
    }

    pub fn with_config(backend: B, config: GraphConfig) -> Self {
        Self { backend, config }
    }

    /// Access the underlying backend (for advanced use).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn reader(&self) -> EntityReader<'_, B> {
        EntityReader::new(&self.backend, &self.config)
    }

    pub fn writer(&self) -> EntityWriter<'_, B> {
        EntityWriter::new(&self.backend, &self.config)
    }

    pub fn time_tree(&self) -> TimeTree<'_, B> {
        TimeTree::new(&self.backend)
    }

    /// Degree-of-interest operations backed by `extractor`.
    pub fn doi<'g, S: SubgraphExtractor>(&'g self, extractor: &'g S) -> DoiService<'g, S> {
        DoiService::new(extractor)
    }

    /// Shut the backend down.
    pub async fn close(self) -> Result<()> {
        self.backend.shutdown().await
    }
}

/// In-memory graph for testing and embedding.
impl Graph<MemoryBackend> {
    pub async fn open_memory() -> Result<Self> {
        Self::open(GraphConfig::default()).await
    }

    /// Open the backend named by `config`.
    pub async fn open(config: GraphConfig) -> Result<Self> {
        match config.backend {
            BackendConfig::Memory => Ok(Self::with_config(MemoryBackend::new(), config)),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Transaction error: {0}")]
    TxError(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transport status: client errors are 400, everything else 500.
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) | Error::BadRequest(_) | Error::InvalidIdentifier(_) => 400,
            _ => 500,
        }
    }

    pub fn to_failure(&self) -> Failure {
        Failure { message: self.to_string(), status: self.status() }
    }
}

/// The `{message, status}` pair a transport returns for a failed call.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Failure {
    pub message: String,
    pub status: u16,
}

pub type Result<T> = std::result::Result<T, Error>;
