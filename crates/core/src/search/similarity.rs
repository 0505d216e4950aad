//! Cosine similarity and best-match selection.
//!
//! Unlike a nearest-neighbor index, a degenerate (zero-norm) vector is an
//! error here rather than a similarity of 0: a zero embedding in the tree
//! means the node can never be chosen, and that has to surface.

use crate::config;
use crate::error::{Error, Result};
use crate::node::{Node, NodeIndex};
use crate::search::types::ScoredNode;

/// Dot product and squared norms in one pass, accumulated in f64.
#[inline]
fn dot_and_norms(a: &[f32], b: &[f32]) -> (f64, f64, f64) {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    (dot, norm_a, norm_b)
}

#[inline]
fn norm_sq(v: &[f32]) -> f64 {
    v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum()
}

#[inline]
fn is_degenerate(norm_sq: f64) -> bool {
    !(norm_sq.sqrt() >= f64::from(config::DEGENERATE_NORM_EPSILON))
}

/// Cosine similarity of two vectors: `dot(a, b) / (‖a‖·‖b‖)`. Returns a value in \[-1, 1\].
///
/// Fails with [`Error::DegenerateVector`] when either vector has zero norm
/// (or contains NaN) and with [`Error::DimensionMismatch`] when the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    let (dot, norm_a, norm_b) = dot_and_norms(a, b);
    if is_degenerate(norm_a) || is_degenerate(norm_b) {
        return Err(Error::DegenerateVector { index: None });
    }
    // sqrt of the product keeps self-similarity at exactly 1.0.
    Ok((dot / (norm_a * norm_b).sqrt()) as f32)
}

/// Picks the candidate whose `model` embedding is most similar to `query`.
///
/// Ties go to the lowest index, so the result does not depend on iteration
/// order. Fails with [`Error::EmptyCandidateSet`] when there is nothing to
/// choose from, [`Error::DegenerateVector`] when the query or a candidate
/// has zero norm, and [`Error::MissingEmbedding`] when a candidate has no
/// vector for `model`.
pub fn best_match<'a, I>(query: &[f32], candidates: I, model: &str) -> Result<ScoredNode>
where
    I: IntoIterator<Item = &'a Node>,
{
    let query_norm = norm_sq(query);
    if is_degenerate(query_norm) {
        return Err(Error::DegenerateVector { index: None });
    }

    let mut best: Option<(NodeIndex, f32)> = None;
    for node in candidates {
        let vector = node.embedding(model).ok_or_else(|| Error::MissingEmbedding {
            index: node.index,
            model: model.to_string(),
        })?;
        if vector.len() != query.len() {
            return Err(Error::DimensionMismatch {
                expected: query.len(),
                found: vector.len(),
            });
        }
        let (dot, _, norm) = dot_and_norms(query, vector);
        if is_degenerate(norm) {
            return Err(Error::DegenerateVector {
                index: Some(node.index),
            });
        }
        let score = (dot / (query_norm * norm).sqrt()) as f32;
        let better = match best {
            None => true,
            Some((best_index, best_score)) => {
                score > best_score || (score == best_score && node.index < best_index)
            }
        };
        if better {
            best = Some((node.index, score));
        }
    }

    best.map(|(index, score)| ScoredNode { index, score })
        .ok_or(Error::EmptyCandidateSet {
            parent: None,
            layer: 0,
        })
}
