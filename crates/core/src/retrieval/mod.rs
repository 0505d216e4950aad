//! Retrieval: greedy descent through the tree and ground-truth path resolution.

/// Greedy per-layer descent from the roots to a leaf.
pub mod descend;
/// Root-first ancestor chains for leaves.
pub mod path;

pub use descend::{descend, retrieve, Retrieval};
pub use path::{correct_paths, path_to_leaf};
