//! Trailing Stop Trader - Main Entry Point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use trailing_stop_trader::config::Config;
use trailing_stop_trader::exchange::{BrokerApi, MockBroker, SessionClient};
use trailing_stop_trader::stream::{FileSink, StreamClient, TickerExtractor};
use trailing_stop_trader::trading::{
    ConfirmedPosition, MarketSource, PositionLifecycle, PositionState,
};

const PAPER_ACCOUNT: &str = "PAPER";

/// Trailing Stop Trader CLI
#[derive(Parser)]
#[command(name = "trailing-stop-trader")]
#[command(version, about = "Open verified trailing-stop positions and ingest ticker mentions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a position, attach a trailing stop and verify it
    Trade {
        /// Search term that must match exactly one market
        #[arg(short, long, conflicts_with = "epic", required_unless_present = "epic")]
        symbol: Option<String>,

        /// Instrument id, skipping the search
        #[arg(short, long)]
        epic: Option<String>,

        /// Trade against the in-memory paper broker
        #[arg(long)]
        paper: bool,

        /// Keep watching the position until it is stopped out or Ctrl-C
        #[arg(long)]
        monitor: bool,

        /// Seconds between refreshes while monitoring
        #[arg(long, default_value = "30")]
        interval: u64,
    },

    /// List open positions
    Positions,

    /// Close the open position with this deal reference
    Close {
        #[arg(short, long)]
        deal_reference: String,
    },

    /// Replace the stream filter rules, then save every matching post
    Stream,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Commands::Trade {
            symbol,
            epic,
            paper,
            monitor,
            interval,
        } => {
            let source = match (symbol, epic) {
                (Some(symbol), _) => MarketSource::Symbol(symbol),
                (None, Some(epic)) => MarketSource::Epic(epic),
                (None, None) => anyhow::bail!("either --symbol or --epic is required"),
            };
            run_trade(&config, source, paper, monitor.then(|| Duration::from_secs(interval))).await
        }
        Commands::Positions => {
            config.validate_credentials()?;
            let session = SessionClient::login(&config.broker).await?;
            list_positions(&session).await
        }
        Commands::Close { deal_reference } => {
            config.validate_credentials()?;
            let session = SessionClient::login(&config.broker).await?;
            let lifecycle = PositionLifecycle::new(
                &session,
                session.account_id(),
                config.position.clone(),
                config.execution.clone(),
            );
            let closed = lifecycle.close_by_reference(&deal_reference).await?;
            log_position("Closed", &closed);
            Ok(())
        }
        Commands::Stream => run_stream(&config).await,
    }
}

async fn run_trade(
    config: &Config,
    source: MarketSource,
    paper: bool,
    monitor_interval: Option<Duration>,
) -> Result<()> {
    let (broker, account_id): (Box<dyn BrokerApi>, String) = if paper {
        let account_id = if config.broker.account_id.is_empty() {
            PAPER_ACCOUNT.to_string()
        } else {
            config.broker.account_id.clone()
        };
        info!(%account_id, "Paper trading against mock broker");
        (Box::new(MockBroker::paper(&account_id).await), account_id)
    } else {
        config.validate_credentials()?;
        info!(root = %config.broker.root_endpoint, "Live trading");
        let session = SessionClient::login(&config.broker).await?;
        let account_id = session.account_id().to_string();
        (Box::new(session), account_id)
    };

    log_config(config);

    let lifecycle = PositionLifecycle::new(
        broker.as_ref(),
        account_id,
        config.position.clone(),
        config.execution.clone(),
    );

    let mut open = match lifecycle.open_verified(&source, &config.trailing_stop).await {
        Ok(open) => open,
        Err(e) => {
            if e.leaves_exposure() {
                error!(error = %e, "Position may still be open, check the broker");
            } else {
                error!(error = %e, "Trade aborted");
            }
            return Err(e.into());
        }
    };

    log_position("Opened", open.position());

    let Some(interval) = monitor_interval else {
        return Ok(());
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    match open.monitor(interval, &shutdown).await? {
        PositionState::Closed => info!("Position closed by broker"),
        state => warn!(%state, deal_id = %open.position().deal_id, "Left position open with trailing stop"),
    }

    Ok(())
}

async fn list_positions(broker: &dyn BrokerApi) -> Result<()> {
    let positions = broker.open_positions().await?;
    if positions.is_empty() {
        info!("No open positions");
    }
    for entry in positions {
        log_position("Open", &ConfirmedPosition::from(entry));
    }
    Ok(())
}

async fn run_stream(config: &Config) -> Result<()> {
    let stream = &config.stream;
    anyhow::ensure!(!stream.bearer_token.is_empty(), "stream bearer_token is required");
    anyhow::ensure!(!stream.rules.is_empty(), "at least one stream rule is required");

    let client = StreamClient::new(&stream.bearer_token, &stream.rules_url, &stream.stream_url)?;
    let extractor = TickerExtractor::new(stream.ticker_policy)?;
    let sink = FileSink::create(&stream.output_dir).await?;

    client.reset_rules(&stream.rules).await?;
    let handled = client.run(&extractor, &sink).await?;
    info!(handled, "Stream ended");
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "trailing-stop-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the whole run.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("trailing_stop_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!(
        allocation_fraction = %config.position.allocation_fraction,
        direction = %config.position.direction,
        currency = %config.position.currency_code,
        "Position settings"
    );
    info!(
        trailing_stop_distance = %config.trailing_stop.trailing_stop_distance,
        trailing_step = %config.trailing_stop.trailing_step,
        stop_level = %config.trailing_stop.stop_level,
        limit_level = ?config.trailing_stop.limit_level,
        stop_distance_buffer = %config.execution.stop_distance_buffer,
        "Trailing stop rule"
    );
}

fn log_position(label: &str, p: &ConfirmedPosition) {
    info!(
        deal_id = %p.deal_id,
        deal_reference = %p.deal_reference,
        epic = %p.epic,
        direction = %p.direction,
        size = %p.size,
        level = %p.level,
        stop_level = ?p.stop_level,
        trailing_stop_distance = ?p.trailing_stop_distance,
        trailing_step = ?p.trailing_step,
        "{label} position"
    );
}
