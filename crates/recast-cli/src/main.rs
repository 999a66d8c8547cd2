//! CLI entrypoint for recast
//!
//! Reads documents from a JSONL file, wires the configured provider,
//! classifier and sink into a round orchestrator, and runs the batch.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use recast_core::Document;
use recast_runtime::config::{ClassifierBackend, DisableTarget, PipelineMode};
use recast_runtime::orchestrator::required_roles;
use recast_runtime::prompts::system_prompt;
use recast_runtime::providers::{LlmProvider, ProviderRegistry};
use recast_runtime::{
    AgentJudgeOracle, AgentRole, BatchRunner, GenerationAgent, JsonlSink, ProviderAgent,
    RoundOrchestrator, RoundOrchestratorBuilder, RuntimeConfig,
};

/// Revise documents in rounds until a classifier accepts them.
#[derive(Parser, Debug)]
#[command(name = "recast", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSONL input, one {"id", "title", "text"} object per line
    #[arg(short, long)]
    input: PathBuf,

    /// Pipeline mode: staged or universal
    #[arg(long)]
    mode: Option<PipelineMode>,

    /// Stage to disable in staged mode (1-4 or its name)
    #[arg(long)]
    disable: Option<DisableTarget>,

    /// Maximum revision rounds per document
    #[arg(long)]
    rounds: Option<usize>,

    /// Classifier backend: bert (remote model) or llm (judge agent)
    #[arg(long)]
    detector: Option<ClassifierBackend>,

    /// Output directory for results, timings and audit records
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip this many input records
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Process at most this many records
    #[arg(long)]
    limit: Option<usize>,

    /// Verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Deserialize)]
struct InputRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match cli.verbose {
            0 => "recast_runtime=info,recast=info",
            1 => "recast_runtime=debug,recast_core=debug,recast=debug",
            _ => "recast_runtime=trace,recast_core=trace,recast=trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    let documents = load_documents(&cli.input, cli.start, cli.limit)?;
    if documents.is_empty() {
        bail!("no documents to process in {}", cli.input.display());
    }
    info!(
        documents = documents.len(),
        mode = %config.pipeline.mode,
        max_rounds = config.pipeline.max_rounds,
        "starting recast"
    );

    let registry = ProviderRegistry::with_defaults();
    let provider = registry
        .create(&config.provider.provider_type, &config.provider.to_json())
        .with_context(|| format!("creating provider '{}'", config.provider.provider_type))?;

    let prompts = config.prompts.load().context("loading prompt templates")?;
    let sink = JsonlSink::create(&config.output.dir)
        .with_context(|| format!("creating output directory {}", config.output.dir.display()))?;

    let mut builder = RoundOrchestrator::builder()
        .config(config.clone())
        .prompts(prompts)
        .sink(Arc::new(sink));
    builder = wire_classifier(builder, &config, &provider)?;
    for role in required_roles(&config.pipeline) {
        builder = builder.agent(build_agent(role, &provider, &config));
    }
    let orchestrator = builder.build()?;

    let summary = BatchRunner::new(&orchestrator).run(documents).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn apply_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(mode) = cli.mode {
        config.pipeline.mode = mode;
    }
    if let Some(target) = cli.disable {
        config.pipeline.disabled = Some(target);
    }
    if let Some(rounds) = cli.rounds {
        config.pipeline.max_rounds = rounds;
    }
    if let Some(backend) = cli.detector {
        config.classifier.backend = backend;
    }
    if let Some(dir) = &cli.output {
        config.output.dir = dir.clone();
    }
}

/// Read JSONL records, skipping blank lines. Records without an id get
/// their zero-based line position.
fn load_documents(path: &Path, start: usize, limit: Option<usize>) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("opening input {}", path.display()))?;

    let mut documents = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(&line)
            .with_context(|| format!("{} line {}", path.display(), index + 1))?;
        let id = record.id.unwrap_or_else(|| index.to_string());
        documents.push(Document::new(id, record.title, record.text));
    }

    Ok(documents
        .into_iter()
        .skip(start)
        .take(limit.unwrap_or(usize::MAX))
        .collect())
}

fn build_agent(
    role: AgentRole,
    provider: &Arc<dyn LlmProvider>,
    config: &RuntimeConfig,
) -> Arc<dyn GenerationAgent> {
    Arc::new(
        ProviderAgent::new(role, provider.clone(), config.provider.completion(config.calls.timeout))
            .with_system_prompt(system_prompt(role))
            .with_timeout(config.calls.timeout)
            .with_transient_retries(config.calls.transient_retries),
    )
}

fn judge_agent(config: &RuntimeConfig, provider: &Arc<dyn LlmProvider>) -> AgentJudgeOracle {
    AgentJudgeOracle::new(build_agent(AgentRole::Judge, provider, config))
}

/// Set the verdict oracle and, when a classifier endpoint is configured,
/// the chunk model used for explanations. The judge backend still explains
/// with the endpoint model.
#[cfg(feature = "remote-classifier")]
fn wire_classifier(
    builder: RoundOrchestratorBuilder,
    config: &RuntimeConfig,
    provider: &Arc<dyn LlmProvider>,
) -> Result<RoundOrchestratorBuilder> {
    let remote = config
        .classifier
        .endpoint
        .as_deref()
        .map(|endpoint| Arc::new(remote_oracle(config, endpoint)));

    let builder = match config.classifier.backend {
        ClassifierBackend::Remote => {
            let oracle = remote
                .clone()
                .context("classifier.endpoint is required for the remote backend")?;
            builder.oracle(oracle)
        }
        ClassifierBackend::AgentJudge => builder.oracle(Arc::new(judge_agent(config, provider))),
    };
    Ok(match remote {
        Some(model) => builder.explainer_oracle(model),
        None => builder,
    })
}

#[cfg(feature = "remote-classifier")]
fn remote_oracle(
    config: &RuntimeConfig,
    endpoint: &str,
) -> recast_runtime::ChunkedOracle<recast_runtime::classifier::RemoteChunkModel> {
    use recast_runtime::classifier::RemoteChunkModel;
    use recast_runtime::providers::ApiCredential;
    use recast_runtime::{ChunkedOracle, PredictionCache};
    use std::time::Duration;

    let mut model = RemoteChunkModel::new(endpoint)
        .with_max_chunk_tokens(config.classifier.max_chunk_tokens)
        .with_timeout(config.calls.timeout);
    if let Some(credential) = ApiCredential::optional(
        &serde_json::json!({}),
        "api_key",
        "RECAST_CLASSIFIER_API_KEY",
        "classifier API key",
    ) {
        model = model.with_credential(credential);
    }

    let cache = PredictionCache::new(config.classifier.cache_entries, Duration::from_secs(3600));
    ChunkedOracle::new(model).with_cache(cache)
}

#[cfg(not(feature = "remote-classifier"))]
fn wire_classifier(
    builder: RoundOrchestratorBuilder,
    config: &RuntimeConfig,
    provider: &Arc<dyn LlmProvider>,
) -> Result<RoundOrchestratorBuilder> {
    match config.classifier.backend {
        ClassifierBackend::AgentJudge => Ok(builder.oracle(Arc::new(judge_agent(config, provider)))),
        ClassifierBackend::Remote => {
            bail!("built without the remote-classifier feature; use --detector llm")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_documents_with_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a", "title": "One", "text": "First text."}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"title": "Two", "text": "Second text."}}"#).unwrap();
        writeln!(file, r#"{{"text": "Third text."}}"#).unwrap();

        let all = load_documents(file.path(), 0, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "a");
        assert_eq!(all[1].id, "2");
        assert_eq!(all[2].original_title, "");

        let window = load_documents(file.path(), 1, Some(1)).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].original_text, "Second text.");
    }

    #[test]
    fn test_bad_line_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let err = load_documents(file.path(), 0, None).unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "recast", "--input", "in.jsonl", "--mode", "universal", "--disable", "3", "--rounds",
            "5", "--detector", "llm", "--output", "out",
        ]);
        let mut config = RuntimeConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.pipeline.mode, PipelineMode::Universal);
        assert_eq!(config.pipeline.disabled, Some(DisableTarget::StyleTransform));
        assert_eq!(config.pipeline.max_rounds, 5);
        assert_eq!(config.classifier.backend, ClassifierBackend::AgentJudge);
        assert_eq!(config.output.dir, PathBuf::from("out"));
    }
}
