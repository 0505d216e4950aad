//! Shared, lock-protected handle to a [`Tree`].
//!
//! Evaluation reads the tree from many tasks at once; refinement rewrites
//! embeddings between reads. [`TreeIndex`] wraps the tree in a
//! `parking_lot::RwLock` so readers see one consistent snapshot and every
//! per-example correction runs as a single write section.

use crate::storage::tree::Tree;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// A thread-safe retrieval tree.
///
/// Cloning a `TreeIndex` produces a new handle to the same shared tree.
#[derive(Debug, Clone, Default)]
pub struct TreeIndex {
    pub data: Arc<RwLock<Tree>>,
}

impl TreeIndex {
    /// Wraps a loaded tree.
    pub fn new(tree: Tree) -> Self {
        Self {
            data: Arc::new(RwLock::new(tree)),
        }
    }

    /// Shared read access. Hold it only across synchronous work.
    pub fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.data.read()
    }

    /// Exclusive write access. Everything done under one guard is observed atomically.
    pub fn write(&self) -> RwLockWriteGuard<'_, Tree> {
        self.data.write()
    }

    /// Deep copy of the current tree.
    pub fn snapshot(&self) -> Tree {
        self.data.read().clone()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.data.read().len()
    }

    /// Estimated heap usage in bytes.
    pub fn estimate_memory_bytes(&self) -> usize {
        self.data.read().estimate_memory_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::tests::{three_layer_tree, MODEL};

    #[test]
    fn test_clones_share_the_tree() {
        let index = TreeIndex::new(three_layer_tree());
        let other = index.clone();
        other.write().set_embedding(4, MODEL, vec![0.0, 1.0]).unwrap();
        assert_eq!(index.read().embedding(4, MODEL).unwrap(), &[0.0, 1.0]);
        assert_eq!(index.node_count(), 7);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let index = TreeIndex::new(three_layer_tree());
        let snapshot = index.snapshot();
        index.write().set_embedding(3, MODEL, vec![0.5, 0.5]).unwrap();
        assert_eq!(snapshot.embedding(3, MODEL).unwrap(), &[1.0, 0.0]);
        assert_eq!(index.read().embedding(3, MODEL).unwrap(), &[0.5, 0.5]);
    }

    #[test]
    fn test_memory_estimate_counts_vectors() {
        let index = TreeIndex::new(three_layer_tree());
        let before = index.estimate_memory_bytes();
        assert!(before > 7 * 2 * std::mem::size_of::<f32>());
        index.write().set_embedding(3, "wide", vec![1.0; 64]).unwrap();
        assert!(index.estimate_memory_bytes() >= before + 64 * std::mem::size_of::<f32>());
    }
}
