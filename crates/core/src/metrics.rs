//! Prometheus metrics recording.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the binary installs a recorder.

use crate::error::Error;
use crate::storage::TreeIndex;
use metrics::{counter, gauge, histogram};

/// Records one completed descent and the similarity of the leaf it reached.
pub fn record_retrieval(depth: usize, leaf_score: f32) {
    counter!("treetune_retrievals_total").increment(1);
    histogram!("treetune_retrieval_similarity").record(f64::from(leaf_score));
    histogram!("treetune_retrieval_depth").record(depth as f64);
}

/// Records an embedding correction at `layer`.
pub fn record_correction(layer: usize) {
    counter!("treetune_corrections_total", "layer" => layer.to_string()).increment(1);
}

/// Records a failed example, labeled by error class and variant.
pub fn record_example_failure(err: &Error) {
    counter!(
        "treetune_example_failures_total",
        "class" => err.class().as_str(),
        "kind" => err.kind()
    )
    .increment(1);
}

/// Records the outcome of a finished evaluation run.
pub fn record_evaluation(mode: &'static str, accuracy: f64, examples: usize) {
    let labels = [("mode", mode)];
    gauge!("treetune_accuracy", &labels).set(accuracy);
    counter!("treetune_examples_total", &labels).increment(examples as u64);
}

/// Updates the tree-level gauges.
pub fn update_tree_metrics(index: &TreeIndex) {
    gauge!("treetune_tree_nodes").set(index.node_count() as f64);
    gauge!("treetune_tree_layers").set(index.read().num_layers() as f64);
    gauge!("treetune_tree_memory_bytes").set(index.estimate_memory_bytes() as f64);
}
