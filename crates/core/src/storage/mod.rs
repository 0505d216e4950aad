//! Storage layer: the tree arena, its shared handle, validation, and disk persistence.
//!
//! Nodes live once in a [`Tree`]; layers, roots and leaves are key views over
//! it. [`TreeIndex`] shares a tree between concurrent readers and the
//! sequential refinement writer. Trees are imported as JSON and snapshotted
//! as bincode (atomic temp-file + rename, CRC32 footer).

/// Shared lock-protected tree handle.
pub mod index;
/// Disk persistence: JSON import/export and binary snapshots.
pub mod persistence;
/// Single-owner node arena with layer, root and leaf views.
pub mod tree;
/// Structural health checks.
pub mod validate;

pub use index::TreeIndex;
pub use persistence::{load_snapshot, load_tree, load_tree_json, save_snapshot, save_tree, save_tree_json};
pub use tree::{Tree, TreeLayout};
pub use validate::{Severity, ValidationIssue, ValidationReport};
