//! Global configuration constants for treetune.
//!
//! All tuning parameters and run defaults are defined here. These are
//! compile-time constants; runtime configuration is handled via
//! [`RefineConfig`](crate::refine::RefineConfig), [`EvalConfig`](crate::evaluate::EvalConfig)
//! and the CLI arguments / environment variables in the `treetune` binary.

/// Step size for embedding corrections during refinement.
///
/// Each mistaken example moves the correct node `LEARNING_RATE` of the way
/// toward the query vector and pushes the wrongly chosen node the same amount away.
pub const DEFAULT_LEARNING_RATE: f32 = 0.02;

/// Key under which node embeddings are stored when no model is specified.
pub const DEFAULT_EMBEDDING_MODEL: &str = "OpenAI";

/// Maximum number of evaluation examples in flight at once.
///
/// Bounds concurrent calls into the embedder, which is usually rate limited.
pub const DEFAULT_EVAL_CONCURRENCY: usize = 8;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 8192;

/// Norm below which a vector is treated as zero for cosine similarity.
pub const DEGENERATE_NORM_EPSILON: f32 = 1e-10;

/// Number of synthetic questions generated per leaf when none is specified.
pub const DEFAULT_QUESTIONS_PER_LEAF: usize = 2;

/// Question templates used by the offline generator; `{text}` is replaced
/// by an excerpt of the leaf.
pub const DEFAULT_QUESTION_TEMPLATES: &[&str] = &[
    "What does the text say about {text}?",
    "Which passage covers {text}?",
];

/// Maximum characters of leaf text placed into a question template.
pub const DEFAULT_QUESTION_EXCERPT_CHARS: usize = 160;

/// File extension for binary tree snapshots.
pub const SNAPSHOT_EXTENSION: &str = "tree";

/// Log a progress line every this many examples during long runs.
pub const PROGRESS_LOG_INTERVAL: usize = 100;

/// Environment variable overriding the embedding model key in the CLI.
pub const ENV_EMBEDDING_MODEL: &str = "TREETUNE_MODEL";

/// Environment variable providing a default shuffle seed in the CLI.
pub const ENV_SHUFFLE_SEED: &str = "TREETUNE_SEED";
