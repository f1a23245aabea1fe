use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::Instrument;

use crate::api::ExchangeClient;
use crate::config::BotConfig;
use crate::error::CycleError;
use crate::execution::candle_buffer::{closed_candles, CandleBuffer};
use crate::execution::sizing::apply_exchange_filters;
use crate::execution::{Executor, Position, PositionLifecycle};
use crate::journal::TradeJournal;
use crate::models::{Candle, Direction, Session, Timeframe, TradeProposal};
use crate::strategy::{EntryReason, SetupPipeline, SignalScan};

/// What one worker iteration did
#[derive(Debug)]
pub enum TickOutcome {
    /// Outside the KillZone, or this period's entry is already used
    Waiting,
    Entered(Position),
    /// Position still open with both protective orders resting
    Holding,
    Exited(Position),
}

/// Poll-evaluate-act loop for one symbol
///
/// Owns the symbol's lifecycle outright; the only thing shared with other
/// workers is the exchange client.
pub struct SymbolWorker {
    symbol: String,
    config: Arc<BotConfig>,
    exchange: Arc<dyn ExchangeClient>,
    pipeline: SetupPipeline,
    executor: Executor,
    lifecycle: PositionLifecycle,
    candles: CandleBuffer,
}

impl SymbolWorker {
    pub fn new(
        symbol: impl Into<String>,
        config: Arc<BotConfig>,
        exchange: Arc<dyn ExchangeClient>,
        journal: Arc<dyn TradeJournal>,
    ) -> Self {
        let symbol = symbol.into();
        let max_candles = config.candle_limit.max(config.trend_candle_limit) * 2;
        Self {
            pipeline: SetupPipeline::from_config(&config).with_scan(SignalScan::Latest),
            executor: Executor::new(exchange.clone(), journal),
            lifecycle: PositionLifecycle::new(symbol.clone(), config.trade_scope),
            candles: CandleBuffer::new(max_candles),
            symbol,
            config,
            exchange,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn lifecycle(&self) -> &PositionLifecycle {
        &self.lifecycle
    }

    /// Run one iteration at `now`
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, CycleError> {
        let started = Instant::now();
        let session = self.pipeline.classifier().classify(now);
        self.lifecycle.on_clock(now, session);

        if self.lifecycle.open_position().is_some() {
            return Ok(match self.executor.poll_exit(&mut self.lifecycle, now).await? {
                Some(closed) => TickOutcome::Exited(closed),
                None => TickOutcome::Holding,
            });
        }

        if !self.lifecycle.can_propose(session) {
            return Ok(TickOutcome::Waiting);
        }

        let candles = self.refresh(self.config.timeframe, self.config.candle_limit, now).await?;
        let trend_candles = self
            .refresh(self.config.trend_timeframe, self.config.trend_candle_limit, now)
            .await?;
        let balance = self.exchange.fetch_available_balance().await?;

        let date = now.date_naive();
        let session_complete = self.pipeline.classifier().killzone_close(date) - now
            <= self.config.timeframe.duration();
        let eval = self
            .pipeline
            .evaluate(&candles, &trend_candles, date, balance, session_complete);
        if eval.used_fallback() {
            tracing::info!("{} trigger never fired, using first-close fallback", self.symbol);
        }
        // A trigger candle that is no longer the latest closed one means the feed lags
        if let Some(signal) = eval.signal.filter(|s| s.reason != EntryReason::Fallback) {
            if signal.timestamp + self.config.timeframe.duration() * 2 <= now {
                return Err(CycleError::IneligibleSetup(format!(
                    "{} signal on the {} candle is stale at {}",
                    self.symbol, signal.timestamp, now
                )));
            }
        }
        let reason = eval.reason();
        let proposal = eval.proposal?;

        let filters = self.exchange.market_filters(&self.symbol).await?;
        let proposal =
            apply_exchange_filters(&proposal, &filters, balance, &self.config.risk)?;
        self.check_price_inside(&proposal).await?;

        // The session may have ended while we were fetching
        let elapsed = chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        let acting_at = now + elapsed;
        let session = self.pipeline.classifier().classify(acting_at);
        if session != Session::KillZone {
            return Err(CycleError::IneligibleSetup(format!(
                "KillZone ended before {} could enter",
                self.symbol
            )));
        }

        let position = self
            .executor
            .enter(&mut self.lifecycle, proposal, session, &reason, balance, acting_at)
            .await?;
        Ok(TickOutcome::Entered(position))
    }

    /// Fetch, drop the forming candle, merge, and return the stored series
    async fn refresh(
        &self,
        timeframe: Timeframe,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>, CycleError> {
        let fetched = self.exchange.fetch_candles(&self.symbol, timeframe, limit).await?;
        let closed = closed_candles(fetched, timeframe, now);
        self.candles
            .merge(&self.symbol, timeframe, &closed)
            .map_err(CycleError::DataUnavailable)?;

        let stored = self
            .candles
            .get_candles(&self.symbol, timeframe)
            .map_err(CycleError::DataUnavailable)?;
        if stored.is_empty() {
            return Err(CycleError::DataUnavailable(format!(
                "no closed {} candles for {}",
                timeframe, self.symbol
            )));
        }
        Ok(stored)
    }

    /// A market entry is pointless once price already trades beyond a level
    async fn check_price_inside(&self, proposal: &TradeProposal) -> Result<(), CycleError> {
        let price = self.exchange.fetch_last_price(&self.symbol).await?;
        let inside = match proposal.direction {
            Direction::Long => price > proposal.stop_loss && price < proposal.take_profit,
            Direction::Short => price < proposal.stop_loss && price > proposal.take_profit,
        };
        if inside {
            Ok(())
        } else {
            Err(CycleError::IneligibleSetup(format!(
                "{} last price {} outside stop {} / target {}",
                self.symbol, price, proposal.stop_loss, proposal.take_profit
            )))
        }
    }

    fn next_delay(&self) -> Duration {
        let secs = if self.lifecycle.open_position().is_some() {
            self.config.position_poll_secs
        } else {
            self.config.poll_interval_secs
        };
        Duration::from_secs(secs.max(1))
    }

    /// Loop until `shutdown` flips to true. Stops only between iterations.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let span = tracing::info_span!("worker", symbol = %self.symbol);
        async move {
            if let Err(e) = self
                .exchange
                .set_leverage(&self.symbol, self.config.risk.leverage)
                .await
            {
                tracing::warn!("Failed to set leverage {}x: {}", self.config.risk.leverage, e);
            }

            tracing::info!("Worker started ({} trigger)", self.pipeline.trigger_name());

            loop {
                if *shutdown.borrow() {
                    break;
                }

                match self.tick(Utc::now()).await {
                    Ok(TickOutcome::Entered(p)) => {
                        tracing::info!("Entered {} {} @ {:.4}", p.direction, p.quantity, p.entry_price)
                    }
                    Ok(TickOutcome::Exited(p)) => tracing::info!(
                        "Exited {:?} P&L {:+.4}, total {:+.4}",
                        p.exit_reason,
                        p.realized_pnl.unwrap_or_default(),
                        self.lifecycle.total_pnl()
                    ),
                    Ok(TickOutcome::Waiting) | Ok(TickOutcome::Holding) => {}
                    Err(e) if e.is_alert() => tracing::error!(alert = true, "{}", e),
                    Err(e @ CycleError::IneligibleSetup(_)) => tracing::info!("Skip: {}", e),
                    Err(e) => tracing::warn!("Cycle failed: {}", e),
                }

                tokio::select! {
                    _ = tokio::time::sleep(self.next_delay()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Worker stopped");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperExchange;
    use crate::journal::MemoryJournal;
    use chrono::TimeZone;

    fn worker(paper: &PaperExchange) -> SymbolWorker {
        SymbolWorker::new(
            "SOLUSDT",
            Arc::new(BotConfig::default()),
            Arc::new(paper.clone()),
            Arc::new(MemoryJournal::new()),
        )
    }

    #[tokio::test]
    async fn test_outside_killzone_waits_without_fetching() {
        // no candles scripted: any fetch would fail
        let paper = PaperExchange::new(1000.0);
        let mut worker = worker(&paper);

        let now = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        assert!(matches!(worker.tick(now).await, Ok(TickOutcome::Waiting)));
        assert!(paper.orders().is_empty());
    }

    #[tokio::test]
    async fn test_missing_candles_are_data_unavailable() {
        let paper = PaperExchange::new(1000.0);
        let mut worker = worker(&paper);

        let now = Utc.with_ymd_and_hms(2025, 6, 2, 14, 30, 0).unwrap();
        let err = worker.tick(now).await.unwrap_err();
        assert!(matches!(err, CycleError::DataUnavailable(_)));
        // a data failure does not use up the session
        assert!(worker.lifecycle().can_propose(Session::KillZone));
    }

    #[tokio::test]
    async fn test_forming_candle_only_is_data_unavailable() {
        let paper = PaperExchange::new(1000.0);
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 14, 2, 0).unwrap();
        let forming = Candle::new(Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(), 1.0, 1.0, 1.0, 1.0);
        paper.set_candles("SOLUSDT", Timeframe::M5, vec![forming]);

        let mut worker = worker(&paper);
        assert!(matches!(
            worker.tick(now).await,
            Err(CycleError::DataUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_run_loop() {
        let paper = PaperExchange::new(1000.0);
        let worker = worker(&paper);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(worker.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert_eq!(paper.leverage("SOLUSDT"), Some(25));
    }
}
