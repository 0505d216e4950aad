//! Structural health check for a loaded tree.
//!
//! [`Tree::from_layers`] only rejects layouts that cannot be indexed at all.
//! Everything else a retrieval or refinement run can trip over is reported
//! here without failing the load:
//! - non-leaf nodes whose children are missing or outside the next layer
//! - nodes below layer 0 with no parent, or with several
//! - leaves above the deepest layer, internal nodes in it
//! - missing, zero-norm or mis-sized embeddings for a model

use crate::node::NodeIndex;
use crate::storage::tree::Tree;
use serde::Serialize;
use std::collections::HashMap;

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    /// Unusual but retrieval still works.
    Warning,
    /// Some queries will fail or descend into the wrong place.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single finding.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    pub node: Option<NodeIndex>,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        if let Some(index) = self.node {
            write!(f, " (node {})", index)?;
        }
        Ok(())
    }
}

/// All findings of one [`Tree::validate`] call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, node: Option<NodeIndex>, message: String) {
        self.issues.push(ValidationIssue {
            severity,
            message,
            node,
        });
    }

    /// No error-level findings.
    pub fn is_healthy(&self) -> bool {
        !self.issues.iter().any(|i| i.severity >= Severity::Error)
    }

    /// No findings at all.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of findings at `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return write!(f, "Validation passed: no issues found");
        }
        writeln!(
            f,
            "Validation report: {} errors, {} warnings",
            self.count(Severity::Error),
            self.count(Severity::Warning)
        )?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

impl Tree {
    /// Checks the structural invariants of the tree.
    ///
    /// When `model` is given, embeddings under that key are checked too.
    pub fn validate(&self, model: Option<&str>) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Some(deepest) = self.deepest_layer() else {
            report.push(Severity::Warning, None, "tree is empty".into());
            return report;
        };

        let mut parents: HashMap<NodeIndex, usize> = HashMap::new();
        for layer in 0..=deepest {
            if self.layer_indices(layer).is_empty() {
                report.push(Severity::Error, None, format!("layer {} is empty", layer));
            }
            for node in self.layer_nodes(layer) {
                if layer == deepest {
                    if !node.is_leaf() {
                        report.push(
                            Severity::Error,
                            Some(node.index),
                            "node in the deepest layer has children".into(),
                        );
                    }
                    continue;
                }
                if node.is_leaf() {
                    report.push(
                        Severity::Error,
                        Some(node.index),
                        format!("leaf at layer {} above the deepest layer {}", layer, deepest),
                    );
                    continue;
                }
                for &child in &node.children {
                    match self.layer_of(child) {
                        Ok(child_layer) if child_layer == layer + 1 => {
                            *parents.entry(child).or_default() += 1;
                        }
                        Ok(child_layer) => report.push(
                            Severity::Error,
                            Some(node.index),
                            format!(
                                "child {} is in layer {}, expected {}",
                                child,
                                child_layer,
                                layer + 1
                            ),
                        ),
                        Err(_) => report.push(
                            Severity::Error,
                            Some(node.index),
                            format!("child {} does not exist", child),
                        ),
                    }
                }
            }
        }

        for layer in 1..=deepest {
            for &index in self.layer_indices(layer) {
                match parents.get(&index).copied().unwrap_or(0) {
                    0 => report.push(
                        Severity::Error,
                        Some(index),
                        format!("node at layer {} has no parent", layer),
                    ),
                    1 => {}
                    n => report.push(Severity::Error, Some(index), format!("node has {} parents", n)),
                }
            }
        }

        if let Some(model) = model {
            self.validate_embeddings(model, &mut report);
        }

        report
    }

    fn validate_embeddings(&self, model: &str, report: &mut ValidationReport) {
        let expected = self.model_dimension(model);
        for node in self.iter() {
            match node.embedding(model) {
                None => report.push(
                    Severity::Error,
                    Some(node.index),
                    format!("missing embedding for model '{}'", model),
                ),
                Some(vector) => {
                    if let Some(dim) = expected {
                        if vector.len() != dim {
                            report.push(
                                Severity::Error,
                                Some(node.index),
                                format!("embedding has dimension {}, expected {}", vector.len(), dim),
                            );
                            continue;
                        }
                    }
                    if vector.iter().all(|x| *x == 0.0) {
                        report.push(
                            Severity::Warning,
                            Some(node.index),
                            "embedding has zero norm".into(),
                        );
                    }
                }
            }
        }
    }
}
