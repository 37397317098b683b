use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use optdesk_core::broker::Broker;
use optdesk_core::config::UnderlyingSpec;
use optdesk_core::ConfigLoader;
use optdesk_engine::{ProtectiveActions, Session, SessionCommand};
use optdesk_feed::instruments::HttpInstrumentMaster;
use optdesk_feed::transport::WsTransport;

#[derive(Parser)]
#[command(name = "optdesk")]
#[command(about = "Options market-data synchronization and risk engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a live session against the feed bridge
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Broker to trade through (flattrade, shoonya)
        #[arg(short, long, default_value = "flattrade")]
        broker: String,
        /// Master symbol to track (e.g. NIFTY, SENSEX)
        #[arg(short, long, default_value = "NIFTY")]
        underlying: String,
    },
    /// Validate and print the effective configuration
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

/// Protective-action sink for sessions without an order channel: every
/// decision is logged loudly but nothing is sent to the broker.
struct LoggingActions;

#[async_trait]
impl ProtectiveActions for LoggingActions {
    async fn close_all_positions(&self) -> anyhow::Result<()> {
        tracing::warn!("Protective action: close all positions (no order channel configured)");
        Ok(())
    }

    async fn engage_kill_switch(&self) -> anyhow::Result<()> {
        tracing::warn!("Protective action: kill switch (no order channel configured)");
        Ok(())
    }
}

fn parse_broker(name: &str) -> anyhow::Result<Broker> {
    match name.to_ascii_lowercase().as_str() {
        "flattrade" => Ok(Broker::Flattrade),
        "shoonya" => Ok(Broker::Shoonya),
        other => bail!("unknown broker {other:?} (expected flattrade or shoonya)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            broker,
            underlying,
        } => {
            run_session(&config, &broker, &underlying).await?;
        }
        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }
    }

    Ok(())
}

async fn run_session(
    config_path: &str,
    broker_name: &str,
    underlying_name: &str,
) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)?;
    let broker = parse_broker(broker_name)?;
    let spec = find_underlying(&config.instruments.underlyings, underlying_name)?;

    tracing::info!(
        broker = %broker,
        underlying = %spec.symbol,
        endpoint = %config.feed.endpoint,
        "Starting session"
    );

    let transport = WsTransport::new(config.feed.endpoint.clone());
    let instrument_master = HttpInstrumentMaster::new(config.instruments.base_url.clone());
    let (session, handle) = Session::new(
        &config,
        broker,
        transport,
        instrument_master,
        std::sync::Arc::new(LoggingActions),
    );
    let session_task = tokio::spawn(session.run());

    handle.send(SessionCommand::Connect).await?;
    handle.send(SessionCommand::SetMasterSymbol(spec)).await?;

    // Wait for shutdown signal (SIGINT or SIGTERM)
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to create SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("failed to create SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }

    handle.shutdown().await?;
    session_task.await?;
    tracing::info!("Session stopped");
    Ok(())
}

fn find_underlying(
    underlyings: &[UnderlyingSpec],
    name: &str,
) -> anyhow::Result<UnderlyingSpec> {
    underlyings
        .iter()
        .find(|u| u.symbol.eq_ignore_ascii_case(name))
        .cloned()
        .with_context(|| {
            let known: Vec<&str> = underlyings.iter().map(|u| u.symbol.as_str()).collect();
            format!("unknown underlying {name:?} (configured: {})", known.join(", "))
        })
}

fn check_config(config_path: &str) -> anyhow::Result<()> {
    let config = ConfigLoader::load_from(config_path)?;
    tracing::info!(
        endpoint = %config.feed.endpoint,
        reconnect_delay_ms = config.feed.initial_reconnect_delay_ms,
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        debounce_ms = config.feed.debounce_ms,
        "Feed configuration"
    );
    tracing::info!(
        call_offset = config.strikes.call_offset,
        put_offset = config.strikes.put_offset,
        expiry_offset = config.strikes.expiry_offset,
        lock_legs = config.strikes.lock_legs,
        "Strike configuration"
    );
    tracing::info!(
        enabled = config.risk.enabled,
        mode = ?config.risk.mode,
        risk_threshold = %config.risk.risk_threshold,
        target_threshold = %config.risk.target_threshold,
        overtrade_guard = config.risk.overtrade_guard,
        "Risk configuration"
    );
    tracing::info!(
        base_url = %config.instruments.base_url,
        underlyings = config.instruments.underlyings.len(),
        "Instrument master configuration"
    );
    Ok(())
}
