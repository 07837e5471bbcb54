//! petrel - Concurrent Petri net runner
//!
//! Loads a net definition and ticks it until a round limit or ctrl-c.

use clap::Parser;
use petrel_runner::{load_definition, Config, Runner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "petrel")]
#[command(about = "Run a concurrent Petri net")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = "PETREL_CONFIG")]
    config: Option<PathBuf>,

    /// Net definition (YAML or JSON)
    #[arg(short, long)]
    net: Option<PathBuf>,

    /// Stop after this many ticks (0 = until ctrl-c)
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Dedicated tick worker threads (0 = shared pool)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Tick transitions one by one in registration order
    #[arg(long)]
    sequential: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.net {
            config.net.definition_path = Some(path.clone());
        }
        if let Some(ticks) = self.ticks {
            config.scheduler.max_ticks = ticks;
        }
        if let Some(workers) = self.workers {
            config.scheduler.worker_threads = workers;
        }
        if self.sequential {
            config.scheduler.parallel = false;
        }
        if self.json {
            config.report.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // File first, then env overrides, then flags
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            config
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    cli.apply(&mut config);

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let Some(path) = config.net.definition_path.clone() else {
        return Err("net.definition_path not set".into());
    };
    let definition = load_definition(&path)?;

    tracing::info!("Starting petrel");
    tracing::info!("  Net: {} ({})", path.display(), definition.checksum);
    tracing::info!(
        "  Scheduler: {} ({} workers)",
        if config.scheduler.parallel { "parallel" } else { "sequential" },
        config.scheduler.worker_threads
    );
    match config.scheduler.max_ticks {
        0 => tracing::info!("  Ticks: until ctrl-c"),
        n => tracing::info!("  Ticks: {}", n),
    }

    let runner = Arc::new(Runner::from_definition(&definition, &config)?);

    // Spawn shutdown signal handler
    let shutdown_runner = runner.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping runner...");
        shutdown_runner.shutdown();
    });

    let report = runner.run().await?;

    if config.report.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} ticks: {} committed, {} cancelled, {} idle{}",
            report.ticks,
            report.committed,
            report.cancelled,
            report.idle,
            if report.interrupted { " (interrupted)" } else { "" }
        );
        for (place, counts) in &report.marking {
            let counts: Vec<String> = counts
                .iter()
                .map(|(token, count)| format!("{}={}", token, count))
                .collect();
            println!("  {}: {}", place, counts.join(", "));
        }
    }

    Ok(())
}
