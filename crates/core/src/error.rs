//! Error types for treetune-core.
//!
//! Every failure that can end the processing of a single example maps to one
//! [`Error`] variant. [`Error::class`] groups variants so the evaluation and
//! refinement harnesses can report broken trees separately from embedder
//! outages.

use std::io;
use thiserror::Error;

/// Result alias used across the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by an [`Embedder`](crate::embedding::Embedder) implementation.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider did not answer in time.
    #[error("embedding request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The provider rejected the request because of quota or rate limits.
    #[error("embedding quota exceeded: {0}")]
    Quota(String),

    /// The provider answered with something that is not a usable vector.
    #[error("malformed embedding response: {0}")]
    Malformed(String),

    /// No vector is known for the given text.
    #[error("no embedding available for text {0:?}")]
    Unknown(String),

    /// Any other provider failure.
    #[error("embedding provider failed: {0}")]
    Provider(String),
}

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The index does not name a node in the store.
    #[error("node {0} not found")]
    NotFound(i64),

    /// A selection step had nothing to choose from.
    ///
    /// At the root layer this means the tree has no roots; below it, a non-leaf
    /// node whose children do not resolve to any node in the next layer.
    #[error("no candidates below node {parent:?} at layer {layer}")]
    EmptyCandidateSet {
        /// Node whose children were expanded, `None` for the root layer.
        parent: Option<i64>,
        /// Layer the candidates were expected in.
        layer: usize,
    },

    /// The index is not a leaf, or a leaf has no ancestor at some layer.
    #[error("node {index} is disconnected: {reason}")]
    DisconnectedNode {
        /// Node whose ancestor chain could not be built.
        index: i64,
        /// What was missing.
        reason: String,
    },

    /// A zero-norm vector was used in a cosine similarity.
    ///
    /// With `index: Some(_)` a tree node holds the vector (structural); with
    /// `None` the query does (input).
    #[error("degenerate vector{}: zero norm", .index.map(|i| format!(" for node {i}")).unwrap_or_default())]
    DegenerateVector {
        /// Node holding the vector, `None` for the query.
        index: Option<i64>,
    },

    /// The embedder failed; never retried inside the core.
    #[error("embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    /// The node has no vector stored under the requested model key.
    #[error("node {index} has no embedding for model '{model}'")]
    MissingEmbedding {
        /// Node index.
        index: i64,
        /// Model key that was looked up.
        model: String,
    },

    /// Two vectors that must share a dimension do not.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// The retrieved and ground-truth paths differ in length (non-uniform leaf depth).
    #[error("retrieved path has {retrieved} nodes but path to leaf {leaf} has {expected}")]
    PathLengthMismatch {
        /// Target leaf.
        leaf: i64,
        /// Length of the retrieved path.
        retrieved: usize,
        /// Length of the ground-truth path.
        expected: usize,
    },

    /// The same index appears twice in the node population.
    #[error("duplicate node index {0}")]
    DuplicateIndex(i64),

    /// The tree layout cannot be indexed at all.
    #[error("invalid tree: {0}")]
    InvalidTree(String),

    /// Filesystem failure while reading or writing trees, datasets or reports.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The task processing one example died before producing a result.
    #[error("example task failed: {0}")]
    Task(String),

    /// A snapshot or tree file could not be decoded.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// A dataset record could not be parsed.
    #[error("dataset error: {0}")]
    Dataset(String),
}

/// Coarse grouping of [`Error`] variants for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The tree itself is inconsistent; retrying will not help.
    Structural,
    /// The failure came from outside the tree (embedder, filesystem) and may go away.
    Transient,
    /// The example or input file is wrong (unknown leaf, zero query vector, bad record).
    Input,
}

impl ErrorClass {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Structural => "structural",
            ErrorClass::Transient => "transient",
            ErrorClass::Input => "input",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classifies the error for reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::EmptyCandidateSet { .. }
            | Error::DisconnectedNode { .. }
            | Error::MissingEmbedding { .. }
            | Error::DimensionMismatch { .. }
            | Error::PathLengthMismatch { .. }
            | Error::DegenerateVector { index: Some(_) }
            | Error::DuplicateIndex(_)
            | Error::InvalidTree(_) => ErrorClass::Structural,
            Error::EmbeddingService(_) | Error::Io(_) | Error::Task(_) => ErrorClass::Transient,
            Error::NotFound(_)
            | Error::DegenerateVector { index: None }
            | Error::Snapshot(_)
            | Error::Dataset(_) => ErrorClass::Input,
        }
    }

    /// True when the error indicates a broken tree.
    pub fn is_structural(&self) -> bool {
        self.class() == ErrorClass::Structural
    }

    /// Short, stable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::EmptyCandidateSet { .. } => "empty_candidate_set",
            Error::DisconnectedNode { .. } => "disconnected_node",
            Error::DegenerateVector { .. } => "degenerate_vector",
            Error::EmbeddingService(_) => "embedding_service",
            Error::MissingEmbedding { .. } => "missing_embedding",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::PathLengthMismatch { .. } => "path_length_mismatch",
            Error::DuplicateIndex(_) => "duplicate_index",
            Error::InvalidTree(_) => "invalid_tree",
            Error::Io(_) => "io",
            Error::Task(_) => "task",
            Error::Snapshot(_) => "snapshot",
            Error::Dataset(_) => "dataset",
        }
    }
}
