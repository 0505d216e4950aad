//! Embedder boundary: text → vector.
//!
//! The core never talks to an embedding service directly. Callers plug in an
//! [`Embedder`]; its failures surface as
//! [`Error::EmbeddingService`](crate::error::Error::EmbeddingService) and are
//! never retried here. Retry and rate-limit policy belong to the implementation.

use crate::error::{EmbeddingError, Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Converts text into a fixed-length vector.
///
/// Implementations must be thread-safe; evaluation calls `embed` from several
/// tasks at once.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Name of the model, for logs.
    fn name(&self) -> &str;

    /// Embeds one text. This is the only suspension point of a retrieval.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }
}

/// Embedder backed by a table of vectors computed ahead of time.
///
/// Lets evaluation and refinement runs replay against a fixed set of query
/// embeddings without a live provider. Unknown texts fail with
/// [`EmbeddingError::Unknown`].
#[derive(Debug, Clone, Default)]
pub struct PrecomputedEmbedder {
    name: String,
    table: HashMap<String, Vec<f32>>,
}

#[derive(Deserialize)]
struct TableRecord {
    text: String,
    embedding: Vec<f32>,
}

impl PrecomputedEmbedder {
    /// Creates an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: HashMap::new(),
        }
    }

    /// Creates a table from text → vector pairs.
    pub fn from_map(name: impl Into<String>, table: HashMap<String, Vec<f32>>) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    /// Adds or replaces one entry.
    pub fn insert(&mut self, text: impl Into<String>, vector: Vec<f32>) {
        self.table.insert(text.into(), vector);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.insert(text, vector);
        self
    }

    /// Loads a table from disk.
    ///
    /// Accepts either a JSON object mapping text to vector, or JSON lines of
    /// `{"text": ..., "embedding": [...]}` records. All vectors must share one
    /// dimension.
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let table = match serde_json::from_str::<HashMap<String, Vec<f32>>>(&raw) {
            Ok(table) => table,
            Err(_) => {
                let mut table = HashMap::new();
                for (line_no, line) in raw.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: TableRecord = serde_json::from_str(line).map_err(|e| {
                        Error::Dataset(format!("{:?} line {}: {}", path, line_no + 1, e))
                    })?;
                    table.insert(record.text, record.embedding);
                }
                table
            }
        };

        let mut dims = table.values().map(Vec::len);
        if let Some(first) = dims.next() {
            if let Some(other) = dims.find(|d| *d != first) {
                return Err(Error::DimensionMismatch {
                    expected: first,
                    found: other,
                });
            }
        }

        tracing::info!("Loaded {} precomputed embeddings from {:?}", table.len(), path);
        Ok(Self::from_map(name, table))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl Embedder for PrecomputedEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::Unknown(text.to_string()))
    }
}

/// Embeds `text`, mapping provider failures into the core error type.
pub async fn embed_query<E: Embedder + ?Sized>(embedder: &E, text: &str) -> Result<Vec<f32>> {
    let started = std::time::Instant::now();
    let vector = embedder.embed(text).await?;
    if vector.is_empty() {
        return Err(EmbeddingError::Malformed("empty vector".into()).into());
    }
    tracing::debug!(
        embedder = embedder.name(),
        dimension = vector.len(),
        elapsed_us = started.elapsed().as_micros() as u64,
        "embedded query"
    );
    Ok(vector)
}
