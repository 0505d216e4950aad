//! Search primitives: cosine similarity, best-match selection, and scored results.

/// Cosine similarity and arg-max selection over a candidate set.
pub mod similarity;
/// Scored node type returned by selection.
pub mod types;

pub use similarity::{best_match, cosine_similarity};
pub use types::ScoredNode;
