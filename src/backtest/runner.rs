use crate::backtest::metrics::{BacktestMetrics, FunnelCounts, TradeRecord};
use crate::config::BotConfig;
use crate::execution::sizing::apply_exchange_filters;
use crate::execution::{ExitReason, PositionLifecycle};
use crate::models::{Candle, Direction, MarketFilters, TradeProposal};
use crate::strategy::{DaySessions, SetupPipeline};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

/// Day-by-day replay of the sweep setup over historical candles
pub struct BacktestRunner {
    config: BotConfig,
    pipeline: SetupPipeline,
    initial_balance: f64,
    filters: Option<MarketFilters>,
    transaction_cost_pct: f64,
}

impl BacktestRunner {
    pub fn new(config: BotConfig, initial_balance: f64) -> Self {
        Self {
            pipeline: SetupPipeline::from_config(&config),
            config,
            initial_balance,
            filters: None,
            transaction_cost_pct: 0.0,
        }
    }

    /// Round proposals onto an exchange grid before entering
    pub fn with_filters(mut self, filters: MarketFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Round-trip fee as a fraction of notional
    pub fn with_transaction_cost(mut self, pct: f64) -> Self {
        self.transaction_cost_pct = pct;
        self
    }

    /// Replay every UTC day present in `candles`
    ///
    /// # Arguments
    /// * `candles` - Trade-timeframe candles, oldest first
    /// * `trend_candles` - Higher-timeframe candles for the trend filter
    pub fn run(&self, symbol: &str, candles: &[Candle], trend_candles: &[Candle]) -> Result<BacktestMetrics> {
        if candles.is_empty() {
            return Err("No candles to backtest".into());
        }

        let dates: BTreeSet<NaiveDate> = candles.iter().map(|c| c.timestamp.date_naive()).collect();
        tracing::info!(
            "Starting backtest: {} candles over {} days ({} trigger)",
            candles.len(),
            dates.len(),
            self.pipeline.trigger_name()
        );

        let mut lifecycle = PositionLifecycle::new(symbol, self.config.trade_scope);
        let mut balance = self.initial_balance;
        let mut funnel = FunnelCounts::default();
        let mut trades = Vec::new();

        for date in dates {
            funnel.days += 1;

            let eval = self
                .pipeline
                .evaluate(candles, trend_candles, date, balance, true);
            funnel.sweeps += eval.swept() as usize;
            funnel.trend_aligned += eval.trend_aligned() as usize;
            funnel.triggers_fired += eval.signal.is_some() as usize;
            funnel.fallbacks_used += eval.used_fallback() as usize;

            let reason = eval.reason();
            let (Some(signal), Ok(proposal)) = (eval.signal, &eval.proposal) else {
                if let Err(e) = &eval.proposal {
                    tracing::debug!("{} {}: {}", symbol, date, e);
                }
                continue;
            };

            let proposal = match &self.filters {
                Some(filters) => {
                    match apply_exchange_filters(proposal, filters, balance, &self.config.risk) {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::debug!("{} {}: {}", symbol, date, e);
                            continue;
                        }
                    }
                }
                None => proposal.clone(),
            };

            let entry_candle = eval.sessions.day[signal.candle_index];
            let session = self.pipeline.classifier().classify(entry_candle.timestamp);
            lifecycle.on_clock(entry_candle.timestamp, session);

            if let Err(e) = lifecycle.propose(proposal.clone(), session) {
                tracing::debug!("{} {}: {}", symbol, date, e);
                continue;
            }
            lifecycle
                .confirm_entry(
                    format!("bt-{}-{}", symbol, date),
                    proposal.entry_price,
                    proposal.quantity,
                    Some(entry_candle.timestamp),
                )
                .map_err(|e| e.to_string())?;

            let (exit_price, exit_reason, exit_time) =
                simulate_exit(&eval.sessions, signal.candle_index, &proposal);
            let closed = lifecycle
                .close_at(exit_price, exit_reason, Some(exit_time))
                .map_err(|e| e.to_string())?;

            if let Some(record) = TradeRecord::from_position(&closed, &reason, self.transaction_cost_pct) {
                balance += record.net_pnl;
                tracing::debug!(
                    "{} {} {} {:?} P&L {:+.4} -> balance {:.2}",
                    symbol,
                    date,
                    record.direction,
                    record.exit_reason,
                    record.net_pnl,
                    balance
                );
                trades.push(record);
            }
            funnel.trades += 1;
        }

        let metrics = BacktestMetrics::from_trades(trades, self.initial_balance, balance, funnel);

        tracing::info!(
            "Backtest complete: {} trades, P&L: ${:.2} ({:.2}%)",
            metrics.total_trades,
            metrics.total_pnl,
            metrics.total_return_pct
        );

        Ok(metrics)
    }

    /// Run backtest and print report
    pub fn run_and_report(
        &self,
        symbol: &str,
        candles: &[Candle],
        trend_candles: &[Candle],
        scenario_name: &str,
    ) -> Result<BacktestMetrics> {
        println!("\n🔬 Running backtest: {}", scenario_name);
        println!("   Trigger: {}", self.pipeline.trigger_name());
        println!("   Candles: {}", candles.len());
        println!("   Initial Balance: ${:.2}", self.initial_balance);

        let metrics = self.run(symbol, candles, trend_candles)?;
        metrics.print_report();

        Ok(metrics)
    }
}

/// Walk the KillZone candles after the entry; the stop is checked before the
/// target on each candle. Unresolved trades exit at the last KillZone close.
fn simulate_exit(
    sessions: &DaySessions,
    entry_index: usize,
    proposal: &TradeProposal,
) -> (f64, ExitReason, DateTime<Utc>) {
    let after = &sessions.day[(entry_index + 1).min(sessions.killzone.end)..sessions.killzone.end];

    for candle in after {
        let (stop_hit, target_hit) = match proposal.direction {
            Direction::Long => (candle.low <= proposal.stop_loss, candle.high >= proposal.take_profit),
            Direction::Short => (candle.high >= proposal.stop_loss, candle.low <= proposal.take_profit),
        };
        if stop_hit {
            return (proposal.stop_loss, ExitReason::StopLoss, candle.timestamp);
        }
        if target_hit {
            return (proposal.take_profit, ExitReason::TakeProfit, candle.timestamp);
        }
    }

    let last = after
        .last()
        .unwrap_or(&sessions.day[entry_index]);
    (last.close, ExitReason::SessionEnd, last.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TrendConfig, TriggerPolicy};
    use chrono::{Duration, TimeZone};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(&day().and_hms_opt(hour, minute, 0).unwrap())
    }

    fn config() -> BotConfig {
        let mut config = BotConfig::default();
        config.trend = TrendConfig {
            ema_period: 5,
            backcandles: 3,
            ..TrendConfig::default()
        };
        config.trigger.policy = TriggerPolicy::EmaCrossover;
        config
    }

    /// Downtrending two-hour candles ending before the KillZone
    fn falling_trend() -> Vec<Candle> {
        let first = at(14, 0) - Duration::hours(60);
        (0..30)
            .map(|i| {
                let close = 300.0 - 5.0 * i as f64;
                Candle::new(first + Duration::hours(2 * i), close + 0.5, close + 1.0, close - 1.0, close)
            })
            .collect()
    }

    /// High sweep, entry at 112 on the first KillZone close, then `kz` candles
    fn short_day(kz: &[(f64, f64, f64)]) -> Vec<Candle> {
        let mut candles = vec![
            Candle::new(at(1, 0), 105.0, 110.0, 100.0, 106.0),
            Candle::new(at(6, 0), 108.0, 115.0, 102.0, 113.0),
            Candle::new(at(14, 0), 111.8, 112.0, 111.5, 112.0),
        ];
        for (i, &(high, low, close)) in kz.iter().enumerate() {
            candles.push(Candle::new(at(14, 5 * (i as u32 + 1)), close, high, low, close));
        }
        candles
    }

    #[test]
    fn test_short_hits_target() {
        let candles = short_day(&[(112.05, 111.8, 111.9), (111.95, 111.5, 111.6)]);
        let runner = BacktestRunner::new(config(), 1000.0);
        let metrics = runner.run("SOLUSDT", &candles, &falling_trend()).unwrap();

        assert_eq!(metrics.total_trades, 1);
        let trade = &metrics.trades[0];
        assert_eq!(trade.direction, Direction::Short);
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert!((trade.exit_price - 111.664).abs() < 1e-9);
        assert_eq!(trade.reason, "high sweep + EMA crossover");
        // 4.4643 contracts times 0.336
        assert!((trade.pnl - 0.336 * (20.0 * 25.0 / 112.0)).abs() < 1e-6);
        assert_eq!(metrics.funnel.trades, 1);
        assert_eq!(metrics.funnel.sweeps, 1);
    }

    #[test]
    fn test_stop_checked_before_target() {
        // one candle spans both levels
        let candles = short_day(&[(112.2, 111.5, 111.9)]);
        let runner = BacktestRunner::new(config(), 1000.0);
        let metrics = runner.run("SOLUSDT", &candles, &falling_trend()).unwrap();

        assert_eq!(metrics.trades[0].exit_reason, ExitReason::StopLoss);
        assert!(metrics.trades[0].pnl < 0.0);
        assert!(metrics.final_balance < 1000.0);
    }

    #[test]
    fn test_unresolved_trade_exits_at_session_end() {
        let candles = short_day(&[(112.05, 111.8, 111.9), (112.0, 111.85, 111.95)]);
        let runner = BacktestRunner::new(config(), 1000.0);
        let metrics = runner.run("SOLUSDT", &candles, &falling_trend()).unwrap();

        let trade = &metrics.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::SessionEnd);
        assert_eq!(trade.exit_price, 111.95);
        assert_eq!(trade.exit_time, at(14, 10));
    }

    #[test]
    fn test_exchange_filters_applied() {
        let candles = short_day(&[(112.05, 111.8, 111.9), (111.95, 111.5, 111.6)]);
        let filters = MarketFilters {
            price_precision: 2,
            quantity_precision: 1,
            min_quantity: 0.1,
            min_notional: 5.0,
        };
        let runner = BacktestRunner::new(config(), 1000.0).with_filters(filters);
        let metrics = runner.run("SOLUSDT", &candles, &falling_trend()).unwrap();

        let trade = &metrics.trades[0];
        assert_eq!(trade.quantity, 4.4);
        assert_eq!(trade.take_profit, 111.66);
    }

    #[test]
    fn test_trend_against_sweep_skips_day() {
        let rising: Vec<Candle> = falling_trend()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let close = 100.0 + 5.0 * i as f64;
                Candle::new(c.timestamp, close - 0.5, close + 1.0, close - 1.0, close)
            })
            .collect();
        let candles = short_day(&[(112.05, 111.8, 111.9)]);
        let metrics = BacktestRunner::new(config(), 1000.0)
            .run("SOLUSDT", &candles, &rising)
            .unwrap();

        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.funnel.sweeps, 1);
        assert_eq!(metrics.funnel.trend_aligned, 0);
    }

    #[test]
    fn test_empty_input() {
        let runner = BacktestRunner::new(config(), 1000.0);
        assert!(runner.run("SOLUSDT", &[], &[]).is_err());
    }
}
