use clap::{Args, Parser, Subcommand};
use std::fs;
use std::future::Future;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use treetune_core::config;
use treetune_core::dataset::{self, Example, TemplateGenerator};
use treetune_core::metrics;
use treetune_core::retrieval::correct_paths;
use treetune_core::storage::{load_tree, save_tree};
use treetune_core::{evaluate, improve, EvalConfig, PrecomputedEmbedder, RefineConfig, TreeIndex};

#[derive(Parser)]
#[command(name = "treetune", about = "Evaluate and refine hierarchical retrieval trees")]
struct Cli {
    /// Write a Prometheus text dump of the run's metrics to this file
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Measure retrieval accuracy over a labeled dataset
    Evaluate(EvaluateArgs),
    /// Refine node embeddings from a labeled dataset and save the result
    Improve(ImproveArgs),
    /// Check a tree for structural problems
    Validate(ValidateArgs),
    /// Write a labeled dataset with template questions for every leaf
    Synthesize(SynthesizeArgs),
}

#[derive(Args)]
struct RunInputs {
    /// Tree file (.json layout or binary snapshot)
    #[arg(short, long)]
    tree: PathBuf,

    /// Labeled questions (JSON lines or JSON array)
    #[arg(short, long)]
    dataset: PathBuf,

    /// Precomputed query embeddings (JSON object or JSON lines)
    #[arg(short, long)]
    embeddings: PathBuf,

    /// Embedding model key on tree nodes
    #[arg(long, env = config::ENV_EMBEDDING_MODEL, default_value = config::DEFAULT_EMBEDDING_MODEL)]
    model: String,

    /// Seed for shuffling the dataset
    #[arg(long, env = config::ENV_SHUFFLE_SEED)]
    seed: Option<u64>,

    /// Drop examples whose target is not a leaf of the tree instead of reporting them as failures
    #[arg(long, default_value_t = false)]
    drop_unknown_leaves: bool,
}

#[derive(Args)]
struct EvaluateArgs {
    #[command(flatten)]
    inputs: RunInputs,

    /// Maximum examples evaluated concurrently
    #[arg(long, default_value_t = config::DEFAULT_EVAL_CONCURRENCY)]
    concurrency: usize,

    /// Shuffle the dataset before evaluating
    #[arg(long, default_value_t = false)]
    shuffle: bool,

    /// Write per-example records as JSON lines
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ImproveArgs {
    #[command(flatten)]
    inputs: RunInputs,

    /// Where to write the refined tree (.json or snapshot)
    #[arg(short, long)]
    output: PathBuf,

    /// Step size of each correction
    #[arg(long, default_value_t = config::DEFAULT_LEARNING_RATE)]
    learning_rate: f32,

    /// Passes over the dataset
    #[arg(long, default_value_t = 1)]
    epochs: usize,

    /// Keep the dataset order
    #[arg(long, default_value_t = false)]
    no_shuffle: bool,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args)]
struct ValidateArgs {
    /// Tree file (.json layout or binary snapshot)
    #[arg(short, long)]
    tree: PathBuf,

    /// Also check embeddings stored under this model key
    #[arg(long, env = config::ENV_EMBEDDING_MODEL)]
    model: Option<String>,
}

#[derive(Args)]
struct SynthesizeArgs {
    /// Tree file (.json layout or binary snapshot)
    #[arg(short, long)]
    tree: PathBuf,

    /// Where to write the dataset (JSON lines)
    #[arg(short, long)]
    output: PathBuf,

    /// Questions generated per leaf
    #[arg(long, default_value_t = config::DEFAULT_QUESTIONS_PER_LEAF)]
    questions_per_leaf: usize,

    /// Question template containing `{text}`; repeat to rotate through several
    #[arg(long)]
    template: Vec<String>,

    /// Maximum characters of leaf text placed into a question
    #[arg(long, default_value_t = config::DEFAULT_QUESTION_EXCERPT_CHARS)]
    max_chars: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("treetune_cli=info".parse()?)
                .add_directive("treetune_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let prometheus_handle = match cli.metrics_file {
        Some(_) => Some(metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?),
        None => None,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_signal().await;
            cancel.cancel();
        }
    });

    let healthy = match cli.command {
        Command::Evaluate(args) => run_evaluate(args, cancel).await?,
        Command::Improve(args) => run_improve(args, cancel).await?,
        Command::Validate(args) => run_validate(args)?,
        Command::Synthesize(args) => run_synthesize(args).await?,
    };

    if let (Some(path), Some(handle)) = (cli.metrics_file.as_deref(), prometheus_handle) {
        fs::write(path, handle.render())?;
        tracing::info!("Wrote metrics to {:?}", path);
    }

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

struct Loaded {
    index: TreeIndex,
    examples: Vec<Example>,
    embedder: Arc<PrecomputedEmbedder>,
}

fn load_inputs(inputs: &RunInputs) -> Result<Loaded, Box<dyn std::error::Error>> {
    let tree = load_tree(&inputs.tree)?;
    if tree.model_dimension(&inputs.model).is_none() {
        return Err(format!(
            "tree {:?} has no embeddings for model '{}'",
            inputs.tree, inputs.model
        )
        .into());
    }
    let report = tree.validate(Some(&inputs.model));
    if !report.is_healthy() {
        tracing::warn!(
            errors = report.count(treetune_core::storage::Severity::Error),
            "Tree has structural errors; affected examples will fail"
        );
    }

    let mut examples = dataset::load_examples(&inputs.dataset)?;
    if inputs.drop_unknown_leaves {
        let dropped = dataset::retain_known_leaves(&mut examples, &tree);
        if dropped > 0 {
            tracing::warn!(
                dropped,
                kept = examples.len(),
                "Dropped examples that do not target a leaf"
            );
        }
    }
    let embedder = PrecomputedEmbedder::load(inputs.model.clone(), &inputs.embeddings)?;
    let index = TreeIndex::new(tree);
    metrics::update_tree_metrics(&index);
    Ok(Loaded {
        index,
        examples,
        embedder: Arc::new(embedder),
    })
}

async fn run_evaluate(
    args: EvaluateArgs,
    cancel: CancellationToken,
) -> Result<bool, Box<dyn std::error::Error>> {
    let Loaded {
        index,
        mut examples,
        embedder,
    } = load_inputs(&args.inputs)?;
    if args.shuffle {
        dataset::shuffle(&mut examples, args.inputs.seed);
    }

    let eval_config = EvalConfig::new()
        .concurrency(args.concurrency)
        .model(args.inputs.model.clone())
        .cancel(cancel);
    let report = evaluate(&index, &examples, embedder, &eval_config).await;

    if let Some(path) = &args.output {
        write_with(path, |w| report.write_records(w))?;
        tracing::info!("Wrote {} records to {:?}", report.records.len(), path);
    }

    let summary = serde_json::json!({
        "accuracy": report.accuracy(),
        "evaluated": report.records.len(),
        "correct": report.correct(),
        "failures": report.failure_counts(),
        "divergence_layers": report.divergence_histogram(),
        "cancelled": report.cancelled,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(!report.cancelled)
}

async fn run_improve(
    args: ImproveArgs,
    cancel: CancellationToken,
) -> Result<bool, Box<dyn std::error::Error>> {
    let Loaded {
        index,
        examples,
        embedder,
    } = load_inputs(&args.inputs)?;

    let refine_config = RefineConfig::new()
        .learning_rate(args.learning_rate)
        .model(args.inputs.model.clone())
        .shuffle(!args.no_shuffle)
        .cancel(cancel);

    let mut reports = Vec::with_capacity(args.epochs);
    for epoch in 0..args.epochs {
        // Derive a distinct but reproducible order per epoch.
        let seed = args.inputs.seed.map(|s| s.wrapping_add(epoch as u64));
        let report = improve(&index, &examples, embedder.as_ref(), &refine_config.clone().seed(seed)).await;
        tracing::info!(
            epoch,
            hit_rate = report.hit_rate(),
            corrected = report.corrected,
            failures = report.failures.len(),
            "Epoch finished"
        );
        let cancelled = report.cancelled;
        reports.push(report);
        if cancelled {
            break;
        }
    }

    // The tree stays consistent on cancellation, so it is saved either way.
    save_tree(&index.snapshot(), &args.output)?;
    metrics::update_tree_metrics(&index);

    if let Some(path) = &args.report {
        write_with(path, |w| {
            serde_json::to_writer_pretty(w, &reports)
                .map_err(|e| treetune_core::Error::Dataset(e.to_string()))
        })?;
    }

    let cancelled = reports.last().is_some_and(|r| r.cancelled);
    let summary: Vec<_> = reports
        .iter()
        .map(|r| {
            serde_json::json!({
                "processed": r.processed,
                "hits": r.hits,
                "corrected": r.corrected,
                "hit_rate": r.hit_rate(),
                "corrections_per_layer": r.corrections_per_layer,
                "failures": r.failures.len(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(!cancelled)
}

fn run_validate(args: ValidateArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let tree = load_tree(&args.tree)?;
    let report = tree.validate(args.model.as_deref());
    let unresolved = correct_paths(&tree)
        .into_values()
        .filter(|path| path.is_err())
        .count();

    println!("{}", report);
    println!(
        "{} nodes, {} layers, {} leaves, {} without a root path",
        tree.len(),
        tree.num_layers(),
        tree.leaf_nodes().len(),
        unresolved
    );
    Ok(report.is_healthy() && unresolved == 0)
}

async fn run_synthesize(args: SynthesizeArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let tree = load_tree(&args.tree)?;
    let generator = if args.template.is_empty() {
        TemplateGenerator::default()
    } else {
        TemplateGenerator::new(args.template)?
    }
    .max_chars(args.max_chars);

    let examples = dataset::synthesize(&tree, &generator, args.questions_per_leaf).await;
    dataset::save_examples(&args.output, &examples)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "leaves": tree.leaf_nodes().len(),
            "questions": examples.len(),
            "output": args.output,
        }))?
    );
    Ok(!examples.is_empty())
}

fn write_with<F>(path: &Path, write: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> treetune_core::Result<()>,
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    write(&mut writer)?;
    Ok(())
}

/// Resolves when `signal` does. If the handler cannot be installed the error
/// is logged and the future never resolves, so the run is not cancelled.
async fn until_signal<F>(signal: F, name: &str)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!("Failed to install {} handler: {}", name, e);
        std::future::pending::<()>().await;
    }
}

async fn wait_for_signal() {
    let ctrl_c = until_signal(tokio::signal::ctrl_c(), "Ctrl+C");

    #[cfg(unix)]
    let terminate = until_signal(
        async {
            let mut sig =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            sig.recv().await;
            Ok(())
        },
        "SIGTERM",
    );

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
    tracing::info!("Stopping after the examples in flight");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_handler_never_fires() {
        let failed = until_signal(async { Err(std::io::Error::other("no signal support")) }, "TEST");
        let fired = tokio::select! {
            biased;
            _ = failed => true,
            _ = tokio::task::yield_now() => false,
        };
        assert!(!fired);
    }

    #[tokio::test]
    async fn test_delivered_signal_fires() {
        let delivered = until_signal(async { Ok(()) }, "TEST");
        let fired = tokio::select! {
            biased;
            _ = delivered => true,
            _ = tokio::task::yield_now() => false,
        };
        assert!(fired);
    }
}
