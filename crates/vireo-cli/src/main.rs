//! Vireo CLI - resolve workflow model dependencies from the command line.
//!
//! A thin collaborator over `vireo-core`: analysis and resolution reports
//! print as JSON so they compose with `jq` and scripts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vireo_core::{ArtifactKind, Resolver, ResolverConfig, TaskStatus};

#[derive(Parser)]
#[command(
    name = "vireo",
    about = "Workflow model dependency resolver",
    version,
    propagate_version = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Configuration file (JSON). Built-in defaults apply when omitted.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a workflow and print its artifact references.
    Analyze {
        /// Workflow JSON file.
        workflow: PathBuf,
    },
    /// Analyze, match locally, and search catalogs for missing artifacts.
    Resolve {
        workflow: PathBuf,
    },
    /// Resolve a workflow and download every missing artifact with a hit.
    Fetch {
        workflow: PathBuf,
    },
    /// Download a single artifact from an explicit URL, bypassing search.
    Pull {
        url: String,
        /// Target filename.
        #[arg(long)]
        filename: String,
        /// Artifact kind, selects the target subdirectory.
        #[arg(long, default_value = "checkpoint")]
        kind: String,
    },
    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Print cache statistics.
    Stats,
    /// Clear one namespace, or everything.
    Clear {
        namespace: Option<String>,
    },
}

fn load_config(path: Option<&Path>) -> vireo_core::Result<ResolverConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| vireo_core::VireoError::io_with_path(e, path))?;
            let config: ResolverConfig = serde_json::from_str(&raw)?;
            Ok(config)
        }
        None => Ok(ResolverConfig::default()),
    }
}

fn load_workflow(path: &Path) -> vireo_core::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| vireo_core::VireoError::io_with_path(e, path))?;
    serde_json::from_str(&raw).map_err(|e| vireo_core::VireoError::InvalidWorkflow {
        message: format!("{}: {}", path.display(), e),
    })
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize output: {}", e),
    }
}

/// Drain the download queue, printing progress lines.
async fn wait_for_downloads(resolver: &Resolver, ids: &[u64]) {
    let mut progress = resolver.downloads().subscribe();

    loop {
        if ids
            .iter()
            .all(|id| match resolver.downloads().task(*id) {
                Some(task) => task.status.is_terminal(),
                None => true,
            })
        {
            break;
        }

        match tokio::time::timeout(Duration::from_secs(1), progress.recv()).await {
            Ok(Ok(event)) => {
                let total = event
                    .total_bytes
                    .map(|t| format!("/{:.1} MiB", t as f64 / 1048576.0))
                    .unwrap_or_default();
                eprintln!(
                    "  task {}: {:.1} MiB{} ({:.1} MiB/s)",
                    event.task_id,
                    event.bytes_transferred as f64 / 1048576.0,
                    total,
                    event.rate_bps / 1048576.0
                );
            }
            _ => continue,
        }
    }

    for id in ids {
        if let Some(task) = resolver.downloads().task(*id) {
            match task.status {
                TaskStatus::Succeeded => info!("{} -> {}", task.filename, task.target_path.display()),
                status => eprintln!(
                    "{}: {} {}",
                    task.filename,
                    status,
                    task.error.unwrap_or_default()
                ),
            }
        }
    }
}

async fn run(cli: Cli) -> vireo_core::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let resolver = Resolver::new(config)?;

    match cli.command {
        Commands::Analyze { workflow } => {
            let document = load_workflow(&workflow)?;
            let refs = resolver.analyze(&document)?;
            print_json(&refs);
        }
        Commands::Resolve { workflow } => {
            let document = load_workflow(&workflow)?;
            let report = resolver.resolve(&document).await?;
            print_json(&report);
        }
        Commands::Fetch { workflow } => {
            let document = load_workflow(&workflow)?;
            let report = resolver.resolve(&document).await?;

            let specs = resolver.plan(&report.candidates, &HashMap::new());
            if specs.is_empty() {
                eprintln!("nothing to download");
                print_json(&report.summary);
                return Ok(());
            }

            let mut ids = Vec::new();
            for spec in specs {
                let filename = spec.filename.clone();
                match resolver.downloads().enqueue(spec) {
                    Ok(id) => ids.push(id),
                    Err(e) => eprintln!("{}: {}", filename, e),
                }
            }
            wait_for_downloads(&resolver, &ids).await;
        }
        Commands::Pull {
            url,
            filename,
            kind,
        } => {
            let kind = ArtifactKind::from_str(&kind).ok_or_else(|| {
                vireo_core::VireoError::InvalidConfig {
                    message: format!("unknown artifact kind: {}", kind),
                }
            })?;
            let spec = resolver.plan_manual(&filename, kind, &url);
            let id = resolver.downloads().enqueue(spec)?;
            wait_for_downloads(&resolver, &[id]).await;
        }
        Commands::Cache { command } => match command {
            CacheCommands::Stats => {
                let stats = resolver.cache_stats()?;
                print_json(&stats);
            }
            CacheCommands::Clear { namespace } => {
                let removed = resolver.cache_clear(namespace.as_deref())?;
                eprintln!("removed {} cache entr(ies)", removed);
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
