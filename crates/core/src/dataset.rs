//! Labeled question datasets.
//!
//! An [`Example`] pairs a natural-language question with the leaf that
//! should answer it. Datasets are stored as JSON lines or a JSON array of
//! `{"question": ..., "node": ...}` records.

use crate::config;
use crate::error::{Error, ErrorClass, Result};
use crate::node::NodeIndex;
use crate::storage::tree::Tree;
use async_trait::async_trait;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One labeled question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub question: String,
    /// Leaf that answers the question.
    #[serde(rename = "node")]
    pub correct_leaf: NodeIndex,
}

impl Example {
    pub fn new(question: impl Into<String>, correct_leaf: NodeIndex) -> Self {
        Self {
            question: question.into(),
            correct_leaf,
        }
    }
}

/// An example that could not be processed, kept in run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleFailure {
    /// Position of the example in the processed order.
    pub position: usize,
    pub question: String,
    pub correct_leaf: NodeIndex,
    pub class: ErrorClass,
    /// Stable error variant name, see [`Error::kind`].
    pub kind: String,
    pub message: String,
}

impl ExampleFailure {
    pub fn new(position: usize, example: &Example, err: &Error) -> Self {
        Self {
            position,
            question: example.question.clone(),
            correct_leaf: example.correct_leaf,
            class: err.class(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Parses a dataset from text: a JSON array, or one JSON record per line.
pub fn parse_examples(raw: &str) -> Result<Vec<Example>> {
    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(raw).map_err(|e| Error::Dataset(e.to_string()));
    }
    let mut examples = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let example: Example = serde_json::from_str(line)
            .map_err(|e| Error::Dataset(format!("line {}: {}", line_no + 1, e)))?;
        examples.push(example);
    }
    Ok(examples)
}

/// Loads a dataset file.
pub fn load_examples(path: &Path) -> Result<Vec<Example>> {
    let raw = fs::read_to_string(path)?;
    let examples = parse_examples(&raw).map_err(|e| match e {
        Error::Dataset(msg) => Error::Dataset(format!("{:?}: {}", path, msg)),
        other => other,
    })?;
    tracing::info!("Loaded {} examples from {:?}", examples.len(), path);
    Ok(examples)
}

/// Writes examples as JSON lines.
pub fn write_examples<W: Write>(mut writer: W, examples: &[Example]) -> Result<()> {
    for example in examples {
        serde_json::to_writer(&mut writer, example).map_err(|e| Error::Dataset(e.to_string()))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes examples to a JSON-lines file.
pub fn save_examples(path: &Path, examples: &[Example]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = fs::File::create(path)?;
    write_examples(std::io::BufWriter::new(file), examples)?;
    tracing::info!("Wrote {} examples to {:?}", examples.len(), path);
    Ok(())
}

/// Shuffles examples in place. The same seed always gives the same order.
pub fn shuffle(examples: &mut [Example], seed: Option<u64>) {
    let mut rng: Box<dyn RngCore> = match seed {
        Some(s) => Box::new(StdRng::seed_from_u64(s)),
        None => Box::new(rand::rng()),
    };
    examples.shuffle(&mut rng);
}

/// Drops examples whose target is not a leaf of `tree`, returning how many were removed.
pub fn retain_known_leaves(examples: &mut Vec<Example>, tree: &Tree) -> usize {
    let before = examples.len();
    examples.retain(|e| matches!(tree.is_leaf(e.correct_leaf), Ok(true)));
    before - examples.len()
}

/// Writes questions for leaf texts, usually backed by a language model.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    /// Produces one question answerable from `text`.
    async fn generate(&self, text: &str) -> Result<String>;
}

/// Offline [`QuestionGenerator`] that fills `{text}` in a rotating list of
/// templates with the first sentence of the leaf text.
///
/// Useful for bootstrapping a dataset without a language model; questions
/// built this way share wording with the leaf, so accuracy on them is an
/// upper bound.
#[derive(Debug)]
pub struct TemplateGenerator {
    templates: Vec<String>,
    max_chars: usize,
    next: AtomicUsize,
}

impl TemplateGenerator {
    /// Fails when no template is given or one lacks the `{text}` placeholder.
    pub fn new(templates: Vec<String>) -> Result<Self> {
        if templates.is_empty() {
            return Err(Error::Dataset("no question templates".into()));
        }
        if let Some(bad) = templates.iter().find(|t| !t.contains("{text}")) {
            return Err(Error::Dataset(format!("template {:?} has no {{text}} placeholder", bad)));
        }
        Ok(Self {
            templates,
            max_chars: config::DEFAULT_QUESTION_EXCERPT_CHARS,
            next: AtomicUsize::new(0),
        })
    }

    pub fn max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    fn excerpt(&self, text: &str) -> String {
        let sentence = text
            .split(['.', '?', '!', '\n'])
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or_default();
        sentence.chars().take(self.max_chars).collect::<String>().trim_end().to_string()
    }
}

impl Default for TemplateGenerator {
    fn default() -> Self {
        Self {
            templates: config::DEFAULT_QUESTION_TEMPLATES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            max_chars: config::DEFAULT_QUESTION_EXCERPT_CHARS,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl QuestionGenerator for TemplateGenerator {
    async fn generate(&self, text: &str) -> Result<String> {
        let excerpt = self.excerpt(text);
        if excerpt.is_empty() {
            return Err(Error::Dataset("leaf has no text to ask about".into()));
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed) % self.templates.len();
        Ok(self.templates[slot].replace("{text}", &excerpt))
    }
}

/// Generates `questions_per_leaf` questions for every leaf of `tree`.
///
/// Leaves are visited in layer order. A failed generation is logged and
/// skipped; the remaining questions are still produced.
pub async fn synthesize<G>(tree: &Tree, generator: &G, questions_per_leaf: usize) -> Vec<Example>
where
    G: QuestionGenerator + ?Sized,
{
    let leaves: Vec<(NodeIndex, String)> = tree
        .leaf_nodes()
        .into_iter()
        .map(|n| (n.index, n.text.clone()))
        .collect();

    let mut examples = Vec::with_capacity(leaves.len() * questions_per_leaf);
    let mut failed = 0usize;
    for (index, text) in &leaves {
        for _ in 0..questions_per_leaf {
            match generator.generate(text).await {
                Ok(question) => examples.push(Example::new(question, *index)),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(leaf = index, error = %e, "question generation failed");
                }
            }
        }
    }
    tracing::info!(
        "Synthesized {} questions for {} leaves ({} failed)",
        examples.len(),
        leaves.len(),
        failed
    );
    examples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::storage::tree::tests::three_layer_tree;
    use tempfile::TempDir;

    fn sample() -> Vec<Example> {
        (0..20).map(|i| Example::new(format!("q{i}"), i)).collect()
    }

    #[test]
    fn test_parse_lines_and_array() {
        let lines = "{\"question\": \"a?\", \"node\": 3}\n\n{\"question\": \"b?\", \"node\": 4}\n";
        let from_lines = parse_examples(lines).unwrap();
        assert_eq!(from_lines, vec![Example::new("a?", 3), Example::new("b?", 4)]);

        let array = r#"[{"question": "a?", "node": 3}, {"question": "b?", "node": 4}]"#;
        assert_eq!(parse_examples(array).unwrap(), from_lines);
    }

    #[test]
    fn test_parse_reports_line() {
        let err = parse_examples("{\"question\": \"a?\", \"node\": 3}\n{\"question\": 1}\n").unwrap_err();
        assert!(matches!(err, Error::Dataset(ref m) if m.starts_with("line 2")), "{err}");
        assert_eq!(err.class(), ErrorClass::Input);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("train.jsonl");
        save_examples(&path, &sample()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().next().unwrap().contains("\"node\":0"));
        assert_eq!(load_examples(&path).unwrap(), sample());
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let mut a = sample();
        let mut b = sample();
        shuffle(&mut a, Some(7));
        shuffle(&mut b, Some(7));
        assert_eq!(a, b);
        assert_ne!(a, sample());

        let mut sorted = a.clone();
        sorted.sort_by_key(|e| e.correct_leaf);
        assert_eq!(sorted, sample());
    }

    #[test]
    fn test_retain_known_leaves() {
        let tree = three_layer_tree();
        let mut examples = vec![Example::new("x", 3), Example::new("y", 1), Example::new("z", 42)];
        assert_eq!(retain_known_leaves(&mut examples, &tree), 2);
        assert_eq!(examples, vec![Example::new("x", 3)]);
    }

    #[tokio::test]
    async fn test_template_generator_rotates_and_excerpts() {
        let generator = TemplateGenerator::new(vec!["About {text}?".into(), "Where is {text}?".into()])
            .unwrap()
            .max_chars(12);
        let text = "  Rust ownership rules prevent data races. Borrowing is checked.";
        assert_eq!(generator.generate(text).await.unwrap(), "About Rust ownersh?");
        assert_eq!(generator.generate(text).await.unwrap(), "Where is Rust ownersh?");
        assert!(matches!(generator.generate(" .\n").await, Err(Error::Dataset(_))));

        assert!(TemplateGenerator::new(Vec::new()).is_err());
        assert!(TemplateGenerator::new(vec!["no placeholder".into()]).is_err());
    }

    #[tokio::test]
    async fn test_synthesize_with_default_templates() {
        let nodes = vec![
            Node::internal(0, "root", vec![1, 2]),
            Node::leaf(1, "Cats sleep a lot. They also purr."),
            Node::leaf(2, ""),
        ];
        let tree = Tree::from_layers(nodes, vec![vec![0], vec![1, 2]]).unwrap();
        let examples = synthesize(&tree, &TemplateGenerator::default(), 2).await;
        assert_eq!(
            examples,
            vec![
                Example::new("What does the text say about Cats sleep a lot?", 1),
                Example::new("Which passage covers Cats sleep a lot?", 1),
            ]
        );
    }

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QuestionGenerator for Counting {
        async fn generate(&self, text: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 1 {
                return Err(Error::Dataset("generator refused".into()));
            }
            Ok(format!("what is {text}?"))
        }
    }

    #[tokio::test]
    async fn test_synthesize_covers_every_leaf() {
        let tree = three_layer_tree();
        let generator = Counting {
            calls: AtomicUsize::new(0),
        };
        let examples = synthesize(&tree, &generator, 2).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 8);
        assert_eq!(examples.len(), 7);
        for leaf in [3, 4, 5, 6] {
            assert!(examples.iter().any(|e| e.correct_leaf == leaf));
        }
    }
}
