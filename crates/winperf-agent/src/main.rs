use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winperf_collector::CollectorFleet;
use winperf_provider::{CounterProvider, SimProvider};

mod config;

#[derive(Parser)]
#[command(name = "winperf-agent", about = "Performance-counter to Prometheus bridge")]
struct Cli {
    #[arg(long, default_value = "winperf.json")]
    config: PathBuf,

    #[arg(long, default_value = "0.0.0.0:9183")]
    listen: String,

    /// Re-read the config file at this interval and reconcile collectors.
    #[arg(long)]
    reload_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::from_default_env().add_directive("winperf=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let agent_config = config::load(&cli.config)?;

    let provider: Arc<dyn CounterProvider> =
        Arc::new(SimProvider::from_fixture(agent_config.simulation.clone()));
    let registry = Registry::new();
    let fleet = Arc::new(CollectorFleet::new(provider, registry.clone()));

    fleet.apply(agent_config.set_configs()).await;
    info!(sets = agent_config.sets.len(), "collectors started");

    if let Some(reload_secs) = cli.reload_secs {
        let reload_fleet = Arc::clone(&fleet);
        let config_path = cli.config.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(reload_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match config::load(&config_path) {
                    Ok(next) => reload_fleet.apply(next.set_configs()).await,
                    Err(err) => {
                        warn!(error = %err, "config reload failed, keeping running collectors")
                    }
                }
            }
        });
    }

    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry);
    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!(addr = %cli.listen, "winperf agent listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "metrics endpoint failed");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    fleet.shutdown().await;

    Ok(())
}

async fn render_metrics(State(registry): State<Registry>) -> Result<String, StatusCode> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|err| {
            error!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
