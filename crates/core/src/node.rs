//! Core node type for treetune.
//!
//! A `Node` is one unit of the hierarchy: a content chunk (leaf) or a summary
//! of its children (internal). Each node carries one embedding per model name;
//! retrieval and refinement always address a single model's vector.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable node identifier. Negative values are reserved for virtual nodes.
pub type NodeIndex = i64;

/// A node of the retrieval tree.
///
/// `index`, `text` and `children` are fixed once the tree is built; only the
/// `embeddings` are rewritten, and only through
/// [`Tree::set_embedding`](crate::storage::Tree::set_embedding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier.
    pub index: NodeIndex,
    /// Content chunk for leaves, summary text for internal nodes.
    #[serde(default)]
    pub text: String,
    /// Indices of the nodes one layer deeper. Empty for leaves.
    #[serde(default)]
    pub children: Vec<NodeIndex>,
    /// Model name → embedding vector.
    #[serde(default)]
    pub embeddings: HashMap<String, Vec<f32>>,
}

impl Node {
    /// Creates a leaf node with no embeddings.
    pub fn leaf(index: NodeIndex, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            children: Vec::new(),
            embeddings: HashMap::new(),
        }
    }

    /// Creates an internal node over the given children.
    pub fn internal(index: NodeIndex, text: impl Into<String>, children: Vec<NodeIndex>) -> Self {
        Self {
            index,
            text: text.into(),
            children,
            embeddings: HashMap::new(),
        }
    }

    /// Adds an embedding for `model`.
    pub fn with_embedding(mut self, model: impl Into<String>, vector: Vec<f32>) -> Self {
        self.embeddings.insert(model.into(), vector);
        self
    }

    /// True when the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True when `index` is one of this node's children.
    pub fn has_child(&self, index: NodeIndex) -> bool {
        self.children.contains(&index)
    }

    /// Embedding stored under `model`, if any.
    pub fn embedding(&self, model: &str) -> Option<&[f32]> {
        self.embeddings.get(model).map(Vec::as_slice)
    }
}
