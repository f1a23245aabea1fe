use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use sweepbot::api::{BinanceFuturesClient, ExchangeClient, PaperExchange, RateLimitedClient};
use sweepbot::config::BotConfig;
use sweepbot::db::PostgresJournal;
use sweepbot::execution::Scheduler;
use sweepbot::journal::{MemoryJournal, TradeJournal};

#[derive(Parser, Debug)]
#[command(name = "sweepbot", about = "Liquidity-sweep futures bot")]
struct Args {
    /// TOML config file (defaults to config/default.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulate orders locally against live market data
    #[arg(long)]
    paper: bool,

    /// Starting balance for paper trading
    #[arg(long, default_value = "1000.0")]
    paper_balance: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = Arc::new(BotConfig::load(args.config.as_deref())?);

    tracing::info!(
        "🚀 SweepBot starting: {} symbols on {} (trend {}), {:?} trigger{}",
        config.symbols.len(),
        config.timeframe,
        config.trend_timeframe,
        config.trigger.policy,
        if args.paper { ", paper mode" } else { "" }
    );

    let exchange = create_exchange(&config, args.paper, args.paper_balance)?;
    let journal = create_journal(&config).await;

    let handle = Scheduler::new(config.clone(), exchange, journal).spawn();
    tracing::info!("✅ Workers running for {}", handle.symbols().join(", "));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("⚠️  Received Ctrl+C, shutting down...");

    handle.shutdown().await;
    tracing::info!("👋 Shutdown complete");

    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sweepbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_exchange(
    config: &BotConfig,
    paper: bool,
    paper_balance: f64,
) -> anyhow::Result<Arc<dyn ExchangeClient>> {
    if paper {
        // Market data endpoints are public, so credentials are optional here
        let binance = BinanceFuturesClient::from_env(config.testnet).or_else(|_| {
            BinanceFuturesClient::new(String::new(), String::new(), config.testnet)
        })?;
        let upstream: Arc<dyn ExchangeClient> =
            Arc::new(RateLimitedClient::new(binance, config.rate_limit_per_second));
        tracing::info!("📝 Paper trading with ${:.2}", paper_balance);
        return Ok(Arc::new(
            PaperExchange::new(paper_balance).with_market_data(upstream),
        ));
    }

    let binance = BinanceFuturesClient::from_env(config.testnet)?;
    Ok(Arc::new(RateLimitedClient::new(
        binance,
        config.rate_limit_per_second,
    )))
}

async fn create_journal(config: &BotConfig) -> Arc<dyn TradeJournal> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::info!("No database_url configured; journaling in memory only");
        return Arc::new(MemoryJournal::new());
    };

    match PostgresJournal::new(url).await {
        Ok(journal) => {
            match (journal.total_pnl().await, journal.open_trades().await) {
                (Ok(pnl), Ok(open)) => tracing::info!(
                    "💾 Postgres journal connected: {} open trades, lifetime P&L {:+.2}",
                    open.len(),
                    pnl
                ),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("Postgres journal connected but summary failed: {}", e)
                }
            }
            Arc::new(journal)
        }
        Err(e) => {
            tracing::warn!("⚠️  Postgres unavailable ({}), journaling in memory only", e);
            Arc::new(MemoryJournal::new())
        }
    }
}
