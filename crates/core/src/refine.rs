//! Online embedding refinement.
//!
//! For each labeled example the tree is searched greedily. When the search
//! ends at the wrong leaf, the first layer where the realized path leaves the
//! ground-truth path gets two corrections: the node that should have been
//! chosen is pulled toward the query and the node that was chosen is pushed
//! away from it.
//!
//! Examples are processed strictly one after another. Each correction is
//! applied under a single write lock so readers sharing the [`TreeIndex`]
//! never see one node updated without the other.

use crate::config;
use crate::dataset::{self, Example, ExampleFailure};
use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, Result};
use crate::metrics;
use crate::node::NodeIndex;
use crate::retrieval::{descend, path_to_leaf};
use crate::storage::{Tree, TreeIndex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Options for a refinement pass.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub learning_rate: f32,
    /// Embedding model key read and written.
    pub model: String,
    /// Shuffle the examples before the pass.
    pub shuffle: bool,
    /// Seed for the shuffle; `None` draws from the thread RNG.
    pub seed: Option<u64>,
    /// Checked between examples.
    pub cancel: CancellationToken,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            learning_rate: config::DEFAULT_LEARNING_RATE,
            model: config::DEFAULT_EMBEDDING_MODEL.to_string(),
            shuffle: true,
            seed: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RefineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of refining on one example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The search already reached the correct leaf; nothing changed.
    Hit,
    /// The search diverged at `layer`; `pulled` moved toward the query and `pushed` away.
    Corrected {
        layer: usize,
        pulled: NodeIndex,
        pushed: NodeIndex,
    },
}

/// Moves every component of `v` by `sign * lr * (q - v)`.
///
/// A zero step leaves the component untouched, bit for bit.
fn nudge(v: &[f32], q: &[f32], lr: f32, sign: f32) -> Vec<f32> {
    v.iter()
        .zip(q)
        .map(|(v, q)| {
            let delta = sign * lr * (q - v);
            if delta == 0.0 {
                *v
            } else {
                v + delta
            }
        })
        .collect()
}

/// Runs one refinement step for `(query_vector, correct_leaf)` on `tree`.
///
/// Both updates are computed before either is written, so an error leaves
/// the tree untouched.
pub fn refine_step(
    tree: &mut Tree,
    query_vector: &[f32],
    correct_leaf: NodeIndex,
    learning_rate: f32,
    model: &str,
) -> Result<StepOutcome> {
    let correct = path_to_leaf(tree, correct_leaf)?;
    let path = descend(tree, query_vector, model)?;

    if path.last().map(|s| s.index) == Some(correct_leaf) {
        return Ok(StepOutcome::Hit);
    }
    if path.len() != correct.len() {
        return Err(Error::PathLengthMismatch {
            leaf: correct_leaf,
            retrieved: path.len(),
            expected: correct.len(),
        });
    }

    let layer = path
        .iter()
        .zip(&correct)
        .position(|(chosen, expected)| chosen.index != *expected)
        .ok_or_else(|| {
            Error::InvalidTree(format!("paths to leaf {} agree but end apart", correct_leaf))
        })?;
    let pulled = correct[layer];
    let pushed = path[layer].index;

    let toward = tree.embedding(pulled, model)?;
    let away = tree.embedding(pushed, model)?;
    for v in [toward, away] {
        if v.len() != query_vector.len() {
            return Err(Error::DimensionMismatch {
                expected: query_vector.len(),
                found: v.len(),
            });
        }
    }
    let toward = nudge(toward, query_vector, learning_rate, 1.0);
    let away = nudge(away, query_vector, learning_rate, -1.0);

    tree.set_embedding(pulled, model, toward)?;
    tree.set_embedding(pushed, model, away)?;

    tracing::debug!(layer, pulled, pushed, "corrected divergence");
    Ok(StepOutcome::Corrected {
        layer,
        pulled,
        pushed,
    })
}

/// Summary of a refinement pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefineReport {
    /// Examples attempted, including failures.
    pub processed: usize,
    /// Examples already retrieved correctly.
    pub hits: usize,
    /// Examples that triggered a correction.
    pub corrected: usize,
    /// Corrections per divergence layer.
    pub corrections_per_layer: BTreeMap<usize, usize>,
    pub failures: Vec<ExampleFailure>,
    /// True when the pass stopped early on cancellation.
    pub cancelled: bool,
}

impl RefineReport {
    /// Fraction of successfully processed examples that were hits before correction.
    pub fn hit_rate(&self) -> f64 {
        let attempted = self.hits + self.corrected;
        if attempted == 0 {
            0.0
        } else {
            self.hits as f64 / attempted as f64
        }
    }
}

/// Refines the tree behind `index` on every example of `dataset`.
///
/// Per-example errors are recorded in the report and the pass continues.
/// The embedder is awaited without holding any lock.
pub async fn improve<E>(
    index: &TreeIndex,
    dataset: &[Example],
    embedder: &E,
    config: &RefineConfig,
) -> RefineReport
where
    E: Embedder + ?Sized,
{
    let mut examples = dataset.to_vec();
    if config.shuffle {
        dataset::shuffle(&mut examples, config.seed);
    }

    let started = Instant::now();
    let mut report = RefineReport::default();
    tracing::info!(
        examples = examples.len(),
        learning_rate = config.learning_rate,
        model = %config.model,
        "Starting refinement pass"
    );

    for (position, example) in examples.iter().enumerate() {
        if config.cancel.is_cancelled() {
            report.cancelled = true;
            tracing::warn!(processed = report.processed, "Refinement cancelled");
            break;
        }

        let outcome = match embed_query(embedder, &example.question).await {
            Ok(query_vector) => {
                let mut tree = index.write();
                refine_step(
                    &mut tree,
                    &query_vector,
                    example.correct_leaf,
                    config.learning_rate,
                    &config.model,
                )
            }
            Err(e) => Err(e),
        };

        report.processed += 1;
        match outcome {
            Ok(StepOutcome::Hit) => report.hits += 1,
            Ok(StepOutcome::Corrected { layer, .. }) => {
                report.corrected += 1;
                *report.corrections_per_layer.entry(layer).or_default() += 1;
                metrics::record_correction(layer);
            }
            Err(e) => {
                tracing::warn!(
                    position,
                    leaf = example.correct_leaf,
                    class = %e.class(),
                    error = %e,
                    "Refinement example failed"
                );
                metrics::record_example_failure(&e);
                report.failures.push(ExampleFailure::new(position, example, &e));
            }
        }

        if report.processed % config::PROGRESS_LOG_INTERVAL == 0 {
            tracing::info!(
                processed = report.processed,
                hit_rate = report.hit_rate(),
                "Refinement progress"
            );
        }
    }

    metrics::record_evaluation("refine", report.hit_rate(), report.processed);
    tracing::info!(
        processed = report.processed,
        hits = report.hits,
        corrected = report.corrected,
        failures = report.failures.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Refinement pass finished"
    );
    report
}
