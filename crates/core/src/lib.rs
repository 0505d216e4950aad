//! # treetune-core
//!
//! Greedy hierarchical retrieval over a multi-layer summary tree, with
//! online refinement of node embeddings from labeled questions.
//!
//! A query is embedded once, then matched layer by layer: the best root,
//! then the best of its children, down to a leaf. Refinement replays labeled
//! examples and nudges the embeddings at the first layer where the search
//! went wrong. Evaluation measures how often the search lands on the right leaf.

/// Global configuration constants: defaults and limits.
pub mod config;
/// Labeled examples: loading, shuffling, and synthesis.
pub mod dataset;
/// The embedder boundary and a precomputed-table implementation.
pub mod embedding;
/// Error types and their reporting classes.
pub mod error;
/// Concurrent accuracy evaluation.
pub mod evaluate;
/// Prometheus metric recording.
pub mod metrics;
/// Tree nodes.
pub mod node;
/// Embedding refinement from retrieval mistakes.
pub mod refine;
/// Greedy descent and ground-truth paths.
pub mod retrieval;
/// Cosine similarity and best-match selection.
pub mod search;
/// Storage layer: tree arena, shared handle, validation, and disk persistence.
pub mod storage;

pub use dataset::Example;
pub use embedding::{Embedder, PrecomputedEmbedder};
pub use error::{EmbeddingError, Error, ErrorClass, Result};
pub use evaluate::{evaluate, EvalConfig, EvalRecord, EvaluationReport};
pub use node::{Node, NodeIndex};
pub use refine::{improve, refine_step, RefineConfig, RefineReport, StepOutcome};
pub use retrieval::{descend, path_to_leaf, retrieve, Retrieval};
pub use storage::{Tree, TreeIndex};
