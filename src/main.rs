use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use idmapper::config::{AppConfig, DEFAULT_CONFIG_PATH};
use idmapper::infra::HttpAuthorityService;
use idmapper::observability::{init_logging, metrics::install_prometheus};
use idmapper::pipeline::{
    CancellationFlag, OperationRegistry, OperationServices, ParameterOverrides, PipelineEngine, RunReport,
    StrategyDefinition,
};
use idmapper::resolver::{ExternalResolverClient, ResolverSettings};

#[derive(Parser)]
#[command(name = "idmapper")]
#[command(about = "Declarative pipelines for harmonizing biological identifiers")]
#[command(version)]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a strategy file
    Run {
        strategy: PathBuf,
        /// Override a strategy parameter (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        /// Write the run summary and statistics as JSON
        #[arg(long)]
        stats_out: Option<PathBuf>,
        /// Write Prometheus metrics text after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },
    /// Pre-flight a strategy without executing any step
    Validate {
        strategy: PathBuf,
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// List the registered operation names
    Operations,
}

fn overrides_from(assignments: &[String]) -> Result<ParameterOverrides> {
    let mut overrides = ParameterOverrides {
        environment: std::env::vars().collect(),
        ..ParameterOverrides::default()
    };
    for assignment in assignments {
        overrides.assign(assignment)?;
    }
    Ok(overrides)
}

fn build_engine(config: &AppConfig) -> Result<PipelineEngine> {
    let registry = Arc::new(OperationRegistry::with_builtin_operations()?);

    let services = match &config.resolver.base_url {
        Some(url) => {
            let service = HttpAuthorityService::new(url.clone(), config.resolver.batch_timeout())?;
            let client = ExternalResolverClient::new(Arc::new(service), ResolverSettings::from(&config.resolver));
            info!("Authority service configured at {}", url);
            OperationServices::with_resolver(Arc::new(client))
        }
        None => OperationServices::default(),
    };

    Ok(PipelineEngine::new(registry, services).with_max_resolution_passes(config.engine.max_resolution_passes))
}

fn print_report(report: &RunReport) {
    println!("\n📊 Strategy '{}' ({}): {}", report.strategy, report.run_id, report.state);
    println!("   Steps executed: {}", report.steps_executed);
    println!("   Duration: {}ms", report.duration().num_milliseconds());
    for artifact in report.context.artifacts() {
        println!("   Artifact: {}", artifact.display());
    }
    if let Some(failed) = report.statistics().get("failed_steps").and_then(|v| v.as_array()) {
        for failure in failed {
            println!("   ⚠️  Step failure: {}", failure);
        }
    }
    if let Some(failure) = &report.failure {
        println!("\n❌ Failed at step '{}' ({}): {}", failure.step, failure.kind, failure.message);
    }
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config).with_context(|| format!("Loading {}", cli.config.display()))?;
    let _guard = init_logging(&config.logging);

    match cli.command {
        Commands::Operations => {
            let registry = OperationRegistry::with_builtin_operations()?;
            for name in registry.names() {
                println!("{}", name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { strategy, set } => {
            let definition = StrategyDefinition::load(&strategy)?;
            let engine = build_engine(&config)?;
            let prepared = engine.prepare(&definition, &overrides_from(&set)?)?;
            println!("✅ Strategy '{}' is valid ({} steps)", prepared.strategy_name(), prepared.steps().count());
            for step in prepared.steps() {
                let mode = if step.required { "required" } else { "optional" };
                println!("   - {} [{}] ({})", step.name, step.operation, mode);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { strategy, set, stats_out, metrics_out } => {
            let metrics_handle = match &metrics_out {
                Some(_) => match install_prometheus() {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                },
                None => None,
            };

            let definition = StrategyDefinition::load(&strategy)?;
            let engine = build_engine(&config)?;
            let prepared = engine.prepare(&definition, &overrides_from(&set)?)?;

            let cancel = CancellationFlag::new();
            let interrupt = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, stopping after the current step");
                        cancel.cancel();
                    }
                })
            };
            let report = engine.execute(prepared, &cancel).await;
            interrupt.abort();

            print_report(&report);
            if let Some(path) = &stats_out {
                write_file(path, &serde_json::to_string_pretty(&report.summary())?)?;
            }
            if let (Some(path), Some(handle)) = (&metrics_out, &metrics_handle) {
                write_file(path, &handle.render())?;
            }

            Ok(if report.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}
