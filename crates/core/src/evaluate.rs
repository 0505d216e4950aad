//! Retrieval accuracy over a labeled dataset.
//!
//! Examples run concurrently, bounded by a semaphore. Each task embeds its
//! question without holding any lock, then takes a read lock only for the
//! synchronous descent and path lookup. Records come back in dataset order.

use crate::config;
use crate::dataset::{Example, ExampleFailure};
use crate::embedding::{embed_query, Embedder};
use crate::error::{Error, ErrorClass, Result};
use crate::metrics;
use crate::node::NodeIndex;
use crate::retrieval::{descend, path_to_leaf};
use crate::storage::TreeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Options for an evaluation run.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Maximum examples in flight; values below 1 are treated as 1.
    pub concurrency: usize,
    pub model: String,
    /// Examples not yet started when this fires are skipped.
    pub cancel: CancellationToken,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            concurrency: config::DEFAULT_EVAL_CONCURRENCY,
            model: config::DEFAULT_EMBEDDING_MODEL.to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Outcome of one successfully evaluated example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub question: String,
    pub correct_leaf: NodeIndex,
    #[serde(rename = "question_embedding")]
    pub query_vector: Vec<f32>,
    /// Realized descent, root first.
    pub retrieved_path: Vec<NodeIndex>,
    /// Ground-truth path, root first.
    pub correct_path: Vec<NodeIndex>,
    /// Similarity between the query and the realized leaf.
    pub similarity: f32,
    pub is_correct: bool,
}

impl EvalRecord {
    /// First layer at which the realized path leaves the ground truth.
    pub fn first_divergence(&self) -> Option<usize> {
        if self.is_correct {
            return None;
        }
        self.retrieved_path
            .iter()
            .zip(&self.correct_path)
            .position(|(a, b)| a != b)
            .or(Some(self.retrieved_path.len().min(self.correct_path.len())))
    }
}

/// Results of an evaluation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    /// Successful examples in dataset order.
    pub records: Vec<EvalRecord>,
    /// Examples that could not be evaluated, in dataset order.
    pub failures: Vec<ExampleFailure>,
    /// Examples never started because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
}

impl EvaluationReport {
    /// Fraction of records that reached the correct leaf; `0.0` with no records.
    ///
    /// Failed examples are not part of the mean.
    pub fn accuracy(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.correct() as f64 / self.records.len() as f64
    }

    /// Number of correct records.
    pub fn correct(&self) -> usize {
        self.records.iter().filter(|r| r.is_correct).count()
    }

    /// Failures per error class.
    pub fn failure_counts(&self) -> BTreeMap<ErrorClass, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.class).or_default() += 1;
        }
        counts
    }

    /// Misses per first divergence layer.
    pub fn divergence_histogram(&self) -> BTreeMap<usize, usize> {
        let mut histogram = BTreeMap::new();
        for layer in self.records.iter().filter_map(EvalRecord::first_divergence) {
            *histogram.entry(layer).or_default() += 1;
        }
        histogram
    }

    /// Writes the records as JSON lines.
    pub fn write_records<W: Write>(&self, mut writer: W) -> Result<()> {
        for record in &self.records {
            serde_json::to_writer(&mut writer, record).map_err(|e| Error::Dataset(e.to_string()))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

async fn evaluate_one<E>(
    index: &TreeIndex,
    example: &Example,
    embedder: &E,
    model: &str,
) -> Result<EvalRecord>
where
    E: Embedder + ?Sized,
{
    let query_vector = embed_query(embedder, &example.question).await?;
    let (path, correct_path) = {
        let tree = index.read();
        let correct_path = path_to_leaf(&tree, example.correct_leaf)?;
        (descend(&tree, &query_vector, model)?, correct_path)
    };

    let similarity = path.last().map(|s| s.score).unwrap_or_default();
    let retrieved_path: Vec<NodeIndex> = path.iter().map(|s| s.index).collect();
    let is_correct = retrieved_path.last() == Some(&example.correct_leaf);
    Ok(EvalRecord {
        question: example.question.clone(),
        correct_leaf: example.correct_leaf,
        query_vector,
        retrieved_path,
        correct_path,
        similarity,
        is_correct,
    })
}

/// Evaluates retrieval on every example of `dataset`.
///
/// Per-example errors, including a panic inside the embedder, are recorded
/// as failures against their example; the run always completes.
pub async fn evaluate<E>(
    index: &TreeIndex,
    dataset: &[Example],
    embedder: Arc<E>,
    config: &EvalConfig,
) -> EvaluationReport
where
    E: Embedder + ?Sized + 'static,
{
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let model: Arc<str> = Arc::from(config.model.as_str());
    let mut tasks = JoinSet::new();

    for (position, example) in dataset.iter().cloned().enumerate() {
        let index = index.clone();
        let embedder = Arc::clone(&embedder);
        let semaphore = Arc::clone(&semaphore);
        let model = Arc::clone(&model);
        let cancel = config.cancel.clone();
        tasks.spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            if permit.is_none() || cancel.is_cancelled() {
                return (position, example, None);
            }
            // A panic in the embedder stays inside this example.
            let task_example = example.clone();
            let outcome = tokio::spawn(async move {
                evaluate_one(&index, &task_example, embedder.as_ref(), &model).await
            })
            .await
            .unwrap_or_else(|e| Err(Error::Task(e.to_string())));
            drop(permit);
            (position, example, Some(outcome))
        });
    }

    let mut slots: Vec<Option<(Example, Option<Result<EvalRecord>>)>> =
        Vec::with_capacity(dataset.len());
    slots.resize_with(dataset.len(), || None);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((position, example, outcome)) => slots[position] = Some((example, outcome)),
            Err(e) => tracing::error!(error = %e, "evaluation task failed"),
        }
    }

    let mut report = EvaluationReport {
        cancelled: config.cancel.is_cancelled(),
        ..EvaluationReport::default()
    };
    for (position, slot) in slots.into_iter().enumerate() {
        let (example, outcome) = match slot {
            Some((_, None)) => {
                report.skipped += 1;
                continue;
            }
            Some((example, Some(outcome))) => (example, outcome),
            None => (
                dataset[position].clone(),
                Err(Error::Task("evaluation task did not report".into())),
            ),
        };
        match outcome {
            Ok(record) => report.records.push(record),
            Err(e) => {
                tracing::warn!(
                    position,
                    leaf = example.correct_leaf,
                    class = %e.class(),
                    error = %e,
                    "Evaluation example failed"
                );
                metrics::record_example_failure(&e);
                report.failures.push(ExampleFailure::new(position, &example, &e));
            }
        }
    }

    let accuracy = report.accuracy();
    metrics::record_evaluation("evaluate", accuracy, report.records.len());
    tracing::info!(
        examples = dataset.len(),
        evaluated = report.records.len(),
        correct = report.correct(),
        failures = report.failures.len(),
        skipped = report.skipped,
        cancelled = report.cancelled,
        accuracy,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Evaluation finished"
    );
    report
}
