use anyhow::Context;
use clap::{Parser, Subcommand};
use coldchain::source::SimulatedSource;
use coldchain::{Config, Engine, EngineEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "coldchain", version, about = "Storage condition monitoring and alert escalation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine and the HTTP API
    Run {
        #[arg(short, long)]
        config: PathBuf,

        /// Use simulated sensors when no source endpoint is configured
        #[arg(long)]
        simulate: bool,
    },
    /// Validate a configuration file
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, simulate } => run(config, simulate).await,
        Command::Check { config } => check(config),
    }
}

fn load(path: &PathBuf) -> anyhow::Result<Config> {
    Config::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = load(&path)?;
    println!("{}: ok", path.display());
    for container in &config.containers {
        match &container.envelope {
            Some(env) => println!(
                "  {:<12} temp [{}, {}] humidity [{}, {}]",
                container.id, env.temp_min, env.temp_max, env.humidity_min, env.humidity_max
            ),
            None => println!("  {:<12} NO ENVELOPE (monitor will not start)", container.id),
        }
    }
    Ok(())
}

async fn run(path: PathBuf, simulate: bool) -> anyhow::Result<()> {
    coldchain::init();
    info!("coldchain v{} starting", coldchain::VERSION);

    let config = load(&path)?;
    let mut engine = Engine::new(&config).context("building engine")?;
    if simulate && config.source.base_url.is_none() {
        info!("Using simulated sensors");
        engine = engine.with_source(Arc::new(SimulatedSource::new(23.0, 55.0).with_drop_rate(0.05)));
    }
    let engine = Arc::new(engine);

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let EngineEvent::RecallRecommended(rec) = &event {
                warn!(container = %rec.container_id, "Recall recommended: {}", rec.reason);
            }
        }
    });

    engine.start();
    let stop = CancellationToken::new();

    #[cfg(feature = "web")]
    let server = {
        let addr = config
            .api
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind address {}", config.api.bind_address))?;
        let engine = engine.clone();
        let stop = stop.clone();
        tokio::spawn(async move { coldchain::api::serve(engine, addr, stop).await })
    };

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Received shutdown signal");
    stop.cancel();
    engine.shutdown().await;

    #[cfg(feature = "web")]
    server.await??;

    let stats = engine.stats();
    info!(
        "Final stats: {} readings, {} missed, {} alerts opened, uptime: {}s",
        stats.readings, stats.missed_samples, stats.alerts_opened, stats.uptime_secs
    );
    Ok(())
}
