use crate::execution::position_manager::{ExitReason, Position};
use crate::models::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a single trade for analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub direction: Direction,
    pub reason: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub quantity: f64,
    pub exit_reason: ExitReason,
    pub pnl: f64,
    /// Price move in the trade's favour, percent of entry
    pub pnl_pct: f64,
    pub holding_period_minutes: i64,
    pub transaction_cost: f64, // Total fees for this trade (entry + exit)
    pub net_pnl: f64,          // P&L after transaction costs
}

impl TradeRecord {
    /// Build from a closed position; `None` while it is still open
    ///
    /// # Arguments
    /// * `transaction_cost_pct` - Round-trip cost as a fraction of notional (e.g. 0.0008)
    pub fn from_position(position: &Position, reason: &str, transaction_cost_pct: f64) -> Option<Self> {
        let (Some(exit_price), Some(exit_time), Some(realized_pnl), Some(exit_reason)) = (
            position.exit_price,
            position.exit_time,
            position.realized_pnl,
            position.exit_reason,
        ) else {
            return None;
        };

        let holding_period = (exit_time - position.entry_time).num_minutes();
        let pnl_pct = position.direction.pnl(position.entry_price, exit_price, 1.0)
            / position.entry_price
            * 100.0;
        let transaction_cost =
            (position.entry_price + exit_price) * position.quantity * (transaction_cost_pct / 2.0);

        Some(Self {
            symbol: position.symbol.clone(),
            direction: position.direction,
            reason: reason.to_string(),
            entry_time: position.entry_time,
            exit_time,
            entry_price: position.entry_price,
            exit_price,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            quantity: position.quantity,
            exit_reason,
            pnl: realized_pnl,
            pnl_pct,
            holding_period_minutes: holding_period,
            transaction_cost,
            net_pnl: realized_pnl - transaction_cost,
        })
    }
}

/// How many days got through each stage of the setup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelCounts {
    pub days: usize,
    pub sweeps: usize,
    pub trend_aligned: usize,
    pub triggers_fired: usize,
    pub fallbacks_used: usize,
    pub trades: usize,
}

/// Summary of a replay, computed from closed trades
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_pnl: f64,
    /// Change of the running balance, net of costs
    pub total_return_pct: f64,
    pub initial_balance: f64,
    pub final_balance: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub take_profit_exits: usize,
    pub stop_loss_exits: usize,
    pub session_end_exits: usize,

    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64, // Gross wins / gross losses

    /// Peak-to-trough of the net balance curve
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,

    pub avg_holding_period_minutes: f64,

    pub total_transaction_costs: f64,
    pub net_pnl: f64,

    pub funnel: FunnelCounts,
    pub trades: Vec<TradeRecord>,
}

impl BacktestMetrics {
    pub fn from_trades(
        trades: Vec<TradeRecord>,
        initial_balance: f64,
        final_balance: f64,
        funnel: FunnelCounts,
    ) -> Self {
        let n = trades.len();
        let per_trade = |total: f64, count: usize| if count > 0 { total / count as f64 } else { 0.0 };

        let (wins, losses): (Vec<f64>, Vec<f64>) =
            trades.iter().map(|t| t.pnl).partition(|p| *p > 0.0);
        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = -losses.iter().sum::<f64>();

        let profit_factor = match (gross_win > 0.0, gross_loss > 0.0) {
            (_, true) => gross_win / gross_loss,
            (true, false) => f64::INFINITY,
            (false, false) => 0.0,
        };

        let exits = |reason: ExitReason| trades.iter().filter(|t| t.exit_reason == reason).count();
        let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
        let total_transaction_costs: f64 = trades.iter().map(|t| t.transaction_cost).sum();
        let (max_drawdown, max_drawdown_pct) = net_drawdown(&trades, initial_balance);

        Self {
            total_pnl,
            total_return_pct: if initial_balance > 0.0 {
                (final_balance / initial_balance - 1.0) * 100.0
            } else {
                0.0
            },
            initial_balance,
            final_balance,
            total_trades: n,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: per_trade(wins.len() as f64 * 100.0, n),
            take_profit_exits: exits(ExitReason::TakeProfit),
            stop_loss_exits: exits(ExitReason::StopLoss),
            session_end_exits: exits(ExitReason::SessionEnd),
            avg_win: per_trade(gross_win, wins.len()),
            avg_loss: per_trade(gross_loss, losses.len()),
            largest_win: wins.iter().copied().fold(0.0, f64::max),
            largest_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor,
            max_drawdown,
            max_drawdown_pct,
            avg_holding_period_minutes: per_trade(
                trades.iter().map(|t| t.holding_period_minutes as f64).sum(),
                n,
            ),
            total_transaction_costs,
            net_pnl: total_pnl - total_transaction_costs,
            funnel,
            trades,
        }
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        let f = &self.funnel;
        println!("\n=== BACKTEST PERFORMANCE REPORT ===\n");

        println!("📊 SETUP FUNNEL");
        println!("  Days:                  {}", f.days);
        println!("  Sweeps:                {}", f.sweeps);
        println!("  Trend aligned:         {}", f.trend_aligned);
        println!(
            "  Triggers fired:        {} ({} fallback)",
            f.triggers_fired, f.fallbacks_used
        );
        println!("  Trades:                {}", f.trades);

        println!("\n💰 P&L SUMMARY");
        println!(
            "  Balance:               ${:.2} -> ${:.2} ({:+.2}%)",
            self.initial_balance, self.final_balance, self.total_return_pct
        );
        println!("  Gross P&L:             ${:.2}", self.total_pnl);
        println!("  Fees:                  ${:.2}", self.total_transaction_costs);
        println!("  Net P&L:               ${:.2}", self.net_pnl);

        if self.total_trades == 0 {
            println!("\n  No trades taken\n");
            return;
        }

        println!("\n📈 TRADES");
        println!(
            "  Won / lost:            {} / {} ({:.1}% win rate)",
            self.winning_trades, self.losing_trades, self.win_rate
        );
        println!(
            "  Exits TP / SL / end:   {} / {} / {}",
            self.take_profit_exits, self.stop_loss_exits, self.session_end_exits
        );
        println!(
            "  Avg win / loss:        ${:.2} / ${:.2}",
            self.avg_win, self.avg_loss
        );
        println!(
            "  Best / worst:          ${:.2} / ${:.2}",
            self.largest_win, self.largest_loss
        );
        println!("  Profit factor:         {:.2}", self.profit_factor);
        println!(
            "  Max drawdown:          ${:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_pct
        );
        println!(
            "  Avg time in trade:     {:.0} min",
            self.avg_holding_period_minutes
        );
        println!();
    }
}

/// Largest drop from a running peak of the balance after fees
fn net_drawdown(trades: &[TradeRecord], initial_balance: f64) -> (f64, f64) {
    let mut balance = initial_balance;
    let mut peak = initial_balance;
    let mut worst = (0.0, 0.0);

    for trade in trades {
        balance += trade.net_pnl;
        peak = peak.max(balance);
        let drop = peak - balance;
        if drop > worst.0 {
            worst = (drop, if peak > 0.0 { drop / peak * 100.0 } else { 0.0 });
        }
    }
    worst
}
