//! Exchange-floor rounding for quantities and prices.
//!
//! Quantities are first raised to the exchange minimum quantity and minimum
//! notional, then truncated to the reported precision. Decimal arithmetic is
//! used so that truncation does not pick up binary float noise.

use crate::config::RiskConfig;
use crate::error::CycleError;
use crate::models::{Direction, MarketFilters, TradeProposal};
use rust_decimal::prelude::*;

fn decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value)
}

/// Truncate toward zero at `dp` decimal places
pub fn truncate(value: f64, dp: u32) -> f64 {
    decimal(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::ToZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

/// Smallest tradable quantity at `price`, already on the precision grid
pub fn minimum_quantity(price: f64, filters: &MarketFilters) -> f64 {
    let by_notional = if price > 0.0 {
        filters.min_notional / price
    } else {
        0.0
    };
    let floor = filters.min_quantity.max(by_notional);

    decimal(floor)
        .map(|d| d.round_dp_with_strategy(filters.quantity_precision, RoundingStrategy::AwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(floor)
}

/// Raise to the exchange floor if needed, otherwise truncate to precision.
///
/// Idempotent, and never returns less than [`minimum_quantity`].
pub fn round_quantity(raw: f64, price: f64, filters: &MarketFilters) -> f64 {
    truncate(raw, filters.quantity_precision).max(minimum_quantity(price, filters))
}

/// Fit a proposal onto the exchange grid.
///
/// The risk budget is `available_balance * risk.risk_fraction`. Rejects when
/// the rounded quantity is zero, when its margin at `risk.leverage` exceeds
/// the budget, when a quantity bumped up to the exchange minimum would lose
/// more than the budget at the stop, or when price truncation collapses the
/// stop distance.
pub fn apply_exchange_filters(
    proposal: &TradeProposal,
    filters: &MarketFilters,
    available_balance: f64,
    risk: &RiskConfig,
) -> Result<TradeProposal, CycleError> {
    let quantity = round_quantity(proposal.quantity, proposal.entry_price, filters);
    if quantity <= 0.0 {
        return Err(CycleError::SizingRejected(format!(
            "quantity {} rounds to zero",
            proposal.quantity
        )));
    }

    let budget = available_balance * risk.risk_fraction;
    let tolerance = budget * 1e-9;
    let margin = quantity * proposal.entry_price / risk.leverage.max(1) as f64;
    if margin > budget + tolerance {
        return Err(CycleError::SizingRejected(format!(
            "quantity {} needs {:.4} margin, risk budget is {:.4}",
            quantity, margin, budget
        )));
    }

    let bumped = quantity > truncate(proposal.quantity, filters.quantity_precision);
    let loss_at_stop = quantity * proposal.stop_distance();
    if bumped && loss_at_stop > budget + tolerance {
        return Err(CycleError::SizingRejected(format!(
            "exchange minimum {} loses {:.4} at the stop, risk budget is {:.4}",
            quantity, loss_at_stop, budget
        )));
    }

    let rounded = TradeProposal {
        direction: proposal.direction,
        entry_price: truncate(proposal.entry_price, filters.price_precision),
        stop_loss: truncate(proposal.stop_loss, filters.price_precision),
        take_profit: truncate(proposal.take_profit, filters.price_precision),
        quantity,
    };
    let stop_on_risk_side = match rounded.direction {
        Direction::Long => rounded.stop_loss < rounded.entry_price,
        Direction::Short => rounded.stop_loss > rounded.entry_price,
    };
    if !stop_on_risk_side {
        return Err(CycleError::SizingRejected(
            "stop collapses onto entry at exchange precision".to_string(),
        ));
    }

    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk(risk_fraction: f64, leverage: u32) -> RiskConfig {
        RiskConfig {
            risk_fraction,
            leverage,
            ..RiskConfig::default()
        }
    }

    fn filters() -> MarketFilters {
        MarketFilters {
            price_precision: 2,
            quantity_precision: 1,
            min_quantity: 0.1,
            min_notional: 5.0,
        }
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate(4.4642857, 2), 4.46);
        assert_eq!(truncate(111.669, 2), 111.66);
        assert_eq!(truncate(0.29, 1), 0.2);
    }

    #[test]
    fn test_raised_to_notional_floor() {
        // 5 / 112 = 0.0446 -> 0.1 once on the grid, min_quantity is also 0.1
        assert_eq!(round_quantity(0.03, 112.0, &filters()), 0.1);

        let strict = MarketFilters {
            min_notional: 20.0,
            ..filters()
        };
        // 20 / 112 = 0.178 rounds up to 0.2
        assert_eq!(round_quantity(0.15, 112.0, &strict), 0.2);
    }

    #[test]
    fn test_rounding_idempotent_and_floored() {
        let f = filters();
        for raw in [0.0, 0.04, 0.1, 0.15, 4.4642857, 17.99] {
            let once = round_quantity(raw, 112.0, &f);
            assert_eq!(round_quantity(once, 112.0, &f), once);
            assert!(once >= f.min_quantity);
            assert!(once * 112.0 >= f.min_notional);
        }
    }

    #[test]
    fn test_apply_filters() {
        let proposal = TradeProposal {
            direction: Direction::Short,
            entry_price: 112.0,
            stop_loss: 112.112,
            take_profit: 111.664,
            quantity: 4.4642857,
        };
        let rounded = apply_exchange_filters(&proposal, &filters(), 1000.0, &risk(0.02, 25)).unwrap();
        assert_eq!(rounded.quantity, 4.4);
        assert_eq!(rounded.stop_loss, 112.11);
        assert_eq!(rounded.take_profit, 111.66);
    }

    #[test]
    fn test_rejects_unaffordable_minimum() {
        let proposal = TradeProposal {
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 99.0,
            take_profit: 103.0,
            quantity: 0.01,
        };
        let expensive = MarketFilters {
            min_quantity: 10.0,
            ..filters()
        };
        // 10 * 100 / 5 = 200 margin against a budget of 1
        let err = apply_exchange_filters(&proposal, &expensive, 50.0, &risk(0.02, 5)).unwrap_err();
        assert!(matches!(err, CycleError::SizingRejected(_)));
    }

    #[test]
    fn test_rejects_collapsed_stop() {
        let proposal = TradeProposal {
            direction: Direction::Long,
            entry_price: 100.004,
            stop_loss: 100.001,
            take_profit: 100.013,
            quantity: 1.0,
        };
        assert!(apply_exchange_filters(&proposal, &filters(), 1000.0, &risk(0.02, 10)).is_err());
    }

    #[test]
    fn test_bumped_quantity_stays_within_risk_budget() {
        let proposal = TradeProposal {
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 90.0,
            take_profit: 130.0,
            quantity: 0.2,
        };
        let notional_floor = MarketFilters {
            min_notional: 100.0,
            ..filters()
        };
        // bumped to 1.0: margin 4 and loss at stop 10 against a budget of 2
        let err = apply_exchange_filters(&proposal, &notional_floor, 100.0, &risk(0.02, 25)).unwrap_err();
        assert!(matches!(err, CycleError::SizingRejected(_)));

        // the same bump fits a larger account
        let rounded = apply_exchange_filters(&proposal, &notional_floor, 1000.0, &risk(0.02, 25)).unwrap();
        assert_eq!(rounded.quantity, 1.0);
        assert!(rounded.quantity * rounded.entry_price / 25.0 <= 1000.0 * 0.02);
    }
}
