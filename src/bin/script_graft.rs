//! Script Graft CLI
//!
//! Runs one batch pass over a catalog snapshot:
//! 1. Loads the graft configuration and the catalog snapshot
//! 2. Scans for inventory records carrying the source marker
//! 3. Patches every entry against an in-memory override layer
//! 4. Writes the override layer (YAML) and the outcome summary (JSON)
//!
//! A fatal error writes nothing and exits with status 1.
//!
//! Usage:
//!   cargo run --features cli --bin script_graft -- \
//!     --config graft.yaml \
//!     --catalog catalog.yaml \
//!     --output ScriptGraft.yaml \
//!     --summary summary.json

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use script_graft::{run_batch, CatalogSnapshot, GraftConfig, InMemoryGraph};

/// Graft counterpart scripts onto inventory and render records
#[derive(Parser, Debug)]
#[command(name = "script_graft")]
#[command(about = "Resolve counterpart scripts and patch record overrides")]
struct Args {
    /// Graft configuration (YAML)
    #[arg(long, short = 'c', env = "SCRIPT_GRAFT_CONFIG")]
    config: PathBuf,

    /// Catalog snapshot (YAML)
    #[arg(long, env = "SCRIPT_GRAFT_CATALOG")]
    catalog: PathBuf,

    /// Name of the source that receives overrides and new records
    #[arg(long, default_value = "ScriptGraft.esp")]
    patch_source: String,

    /// Where to write the override layer
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Where to write the outcome summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Patch in memory but write nothing
    #[arg(long)]
    dry_run: bool,
}

fn run(args: Args) -> Result<()> {
    let config = GraftConfig::from_file(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;
    let snapshot = CatalogSnapshot::from_file(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;

    let mut graph = InMemoryGraph::from_snapshot(snapshot, args.patch_source);
    let summary = run_batch(&mut graph, &config).context("batch aborted")?;

    println!(
        "patched {}, duplicated {}, already patched {}, skipped {}",
        summary.patched,
        summary.duplicated,
        summary.already_patched,
        summary.total_skipped()
    );
    for (reason, count) in &summary.skipped {
        println!("  skipped ({reason}): {count}");
    }

    if args.dry_run {
        return Ok(());
    }

    if let Some(path) = &args.output {
        let yaml = serde_yaml::to_string(&graph.patch_snapshot())?;
        std::fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))?;
    }
    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
