mod adapters;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use takeoff_consensus::{
    EngineConfig, NormalizedInput, Orchestrator, OrchestratorResult, PerformanceModel, Provider,
    TaskType,
};
use tracing::info;

use adapters::{FileAdapter, HttpAdapter};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "takeoff")]
#[command(about = "Reconcile construction takeoffs from several analysis providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-adjudicate saved raw provider outputs (`<provider>.txt` per file)
    Reconcile {
        #[command(flatten)]
        common: CommonArgs,

        /// Directory of saved provider outputs
        #[arg(long)]
        responses: PathBuf,
    },

    /// Call the providers live and reconcile their outputs
    Analyze {
        #[command(flatten)]
        common: CommonArgs,

        /// File holding the system prompt sent to every provider
        #[arg(long)]
        system_prompt: PathBuf,

        /// Providers in dispatch order (default: every provider with a key)
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Normalized plan payload (JSON)
    #[arg(long)]
    input: PathBuf,

    #[arg(long, value_enum, default_value_t = TaskArg::Full)]
    task_type: TaskArg,

    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Performance history (JSON); read if present and rewritten after the run
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TaskArg {
    Takeoff,
    QualityAudit,
    Full,
}

impl From<TaskArg> for TaskType {
    fn from(arg: TaskArg) -> Self {
        match arg {
            TaskArg::Takeoff => TaskType::Takeoff,
            TaskArg::QualityAudit => TaskType::QualityAudit,
            TaskArg::Full => TaskType::Full,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (common, providers, system_prompt) = match cli.command {
        Commands::Reconcile { common, responses } => {
            (common, replay_providers(&responses)?, String::new())
        }
        Commands::Analyze {
            common,
            system_prompt,
            providers,
        } => {
            let prompt = std::fs::read_to_string(&system_prompt).with_context(|| {
                format!("Failed to read system prompt {}", system_prompt.display())
            })?;
            (common, live_providers(&providers)?, prompt)
        }
    };

    let engine_config = match &common.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_env_overrides(),
    };

    let input: NormalizedInput = read_json(&common.input)?;
    let prior: PerformanceModel = match &common.history {
        Some(path) if path.exists() => read_json(path)?,
        _ => PerformanceModel::new(),
    };

    let orchestrator = Orchestrator::new(engine_config, providers)?;
    info!(
        providers = ?orchestrator.provider_ids(),
        task_type = %TaskType::from(common.task_type),
        "Starting consensus run"
    );

    let result = orchestrator
        .orchestrate_with_history(&input, &system_prompt, common.task_type.into(), &prior)
        .await?;

    if let Some(path) = &common.history {
        write_history(path, &result)?;
    }
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn replay_providers(dir: &Path) -> Result<Vec<Provider>> {
    adapters::saved_responses(dir)?
        .into_iter()
        .map(|(id, path)| {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Provider::new(id, Arc::new(FileAdapter::new(content))))
        })
        .collect()
}

fn live_providers(names: &[String]) -> Result<Vec<Provider>> {
    let cli_config = CliConfig::from_env();
    let ids = if names.is_empty() {
        let configured = cli_config.configured();
        if configured.is_empty() {
            return Err(config::ConfigError::NoProviders)
                .context("Set at least one provider API key or pass --providers");
        }
        configured
    } else {
        config::parse_providers(names)?
    };

    ids.into_iter()
        .map(|id| {
            let credentials = cli_config.credentials(id)?.clone();
            let adapter = HttpAdapter::new(id, credentials)
                .with_context(|| format!("Failed to build HTTP client for {id}"))?;
            Ok(Provider::new(id, Arc::new(adapter)))
        })
        .collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_history(path: &Path, result: &OrchestratorResult) -> Result<()> {
    let json = serde_json::to_string_pretty(&result.engine_recommendation.performance_model)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write history {}", path.display()))?;
    info!(path = %path.display(), "Performance history updated");
    Ok(())
}
