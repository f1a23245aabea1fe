use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use sweepbot::backtest::{BacktestMetrics, BacktestRunner, SyntheticDataGenerator};
use sweepbot::config::{BotConfig, TargetPolicy, TriggerPolicy};
use sweepbot::execution::candle_buffer::resample_candles;
use sweepbot::Result;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TriggerArg {
    StructureShift,
    EmaCrossover,
    Pullback,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    FixedRr,
    SessionExtreme,
    LookbackExtreme,
}

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Replay the sweep setup over synthetic session data")]
struct Args {
    /// TOML config file; risk, sessions and trend settings are taken from it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 90)]
    days: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Background trend per day as a fraction of price
    #[arg(long, default_value_t = 0.01)]
    drift: f64,

    #[arg(long, default_value_t = 1000.0)]
    balance: f64,

    /// Round-trip fee as a fraction of notional
    #[arg(long, default_value_t = 0.0008)]
    fee: f64,

    /// Only run this trigger (default: compare structure shift and EMA crossover)
    #[arg(long, value_enum)]
    trigger: Option<TriggerArg>,

    /// Only run this target policy (default: compare fixed R:R and session extreme)
    #[arg(long, value_enum)]
    targets: Option<TargetArg>,

    /// Print trades as JSON instead of the report
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("sweepbot=info")
        .init();

    let args = Args::parse();
    let base = BotConfig::load(args.config.as_deref()).map_err(|e| e.to_string())?;

    let start = NaiveDate::from_ymd_opt(2025, 1, 1).ok_or("invalid start date")?;
    let candles = SyntheticDataGenerator::new(args.seed)
        .with_windows(base.sessions)
        .generate_days(start, args.days, args.drift);
    let trend_candles = resample_candles(&candles, base.trend_timeframe);

    let triggers = match args.trigger {
        Some(TriggerArg::StructureShift) => vec![TriggerPolicy::StructureShift],
        Some(TriggerArg::EmaCrossover) => vec![TriggerPolicy::EmaCrossover],
        Some(TriggerArg::Pullback) => vec![TriggerPolicy::Pullback],
        None => vec![TriggerPolicy::StructureShift, TriggerPolicy::EmaCrossover],
    };
    let targets = match args.targets {
        Some(TargetArg::FixedRr) => vec![TargetPolicy::default()],
        Some(TargetArg::SessionExtreme) => vec![TargetPolicy::SessionExtreme],
        Some(TargetArg::LookbackExtreme) => vec![TargetPolicy::LookbackExtreme { bars: 10 }],
        None => vec![TargetPolicy::default(), TargetPolicy::SessionExtreme],
    };

    if !args.json {
        println!("\n=== SWEEPBOT BACKTEST ===");
        println!(
            "{} days, seed {}, {} candles on {}",
            args.days,
            args.seed,
            candles.len(),
            base.timeframe
        );
    }

    let mut all_metrics = Vec::new();
    for &trigger in &triggers {
        for &target in &targets {
            let mut config = base.clone();
            config.trigger.policy = trigger;
            config.targets = target;

            let name = format!("{:?} / {}", trigger, target_name(&target));
            let runner = BacktestRunner::new(config, args.balance).with_transaction_cost(args.fee);

            let result = if args.json {
                runner.run("SYNTH", &candles, &trend_candles)
            } else {
                runner.run_and_report("SYNTH", &candles, &trend_candles, &name)
            };
            match result {
                Ok(metrics) => all_metrics.push((name, metrics)),
                Err(e) => eprintln!("❌ Backtest failed for {}: {}", name, e),
            }
        }
    }

    if args.json {
        let trades: Vec<_> = all_metrics
            .iter()
            .map(|(name, m)| serde_json::json!({ "run": name, "funnel": m.funnel, "trades": m.trades }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&trades)?);
    } else {
        print_summary_comparison(&all_metrics);
    }

    Ok(())
}

fn target_name(target: &TargetPolicy) -> &'static str {
    match target {
        TargetPolicy::FixedRr { .. } => "fixed R:R",
        TargetPolicy::SessionExtreme => "session extreme",
        TargetPolicy::LookbackExtreme { .. } => "lookback extreme",
    }
}

fn print_summary_comparison(results: &[(String, BacktestMetrics)]) {
    println!("\n=== RUN COMPARISON ===\n");

    println!(
        "{:<36} {:>10} {:>10} {:>8} {:>8} {:>10}",
        "Run", "P&L", "Return%", "Trades", "Win%", "Fallbacks"
    );
    println!("{}", "-".repeat(86));

    for (name, metrics) in results {
        println!(
            "{:<36} {:>10.2} {:>10.2} {:>8} {:>8.1} {:>10}",
            name,
            metrics.net_pnl,
            metrics.total_return_pct,
            metrics.total_trades,
            metrics.win_rate,
            metrics.funnel.fallbacks_used
        );
    }

    println!();
}
