//! Scored node type for selection results.

use crate::node::NodeIndex;
use serde::{Deserialize, Serialize};

/// A node chosen by a selection step, with its cosine similarity to the query.
///
/// Only the index is carried; the node itself stays in the tree arena so that
/// later lookups always see the current embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredNode {
    /// Index of the chosen node.
    pub index: NodeIndex,
    /// Cosine similarity to the query (higher = more similar).
    pub score: f32,
}
