/// Calculate Simple Moving Average (SMA) over the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate the latest Exponential Moving Average (EMA), seeded with the SMA
/// of the first `period` values
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    calculate_ema_series(prices, period).last().copied().flatten()
}

/// EMA aligned to the input, seeded with the SMA of the first `period` values.
///
/// Entries before index `period - 1` are `None` (not enough history).
pub fn calculate_ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return out;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(ema);

    for (i, price) in prices.iter().enumerate().skip(period) {
        ema = (price - ema) * multiplier + ema;
        out[i] = Some(ema);
    }

    out
}

/// Exponentially weighted mean seeded with the first value (no warm-up),
/// defined for every index.
pub fn calculate_ewm_series(prices: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(prices.len());
    let Some(&first) = prices.first() else {
        return out;
    };

    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut ewm = first;
    out.push(ewm);
    for price in &prices[1..] {
        ewm = alpha * price + (1.0 - alpha) * ewm;
        out.push(ewm);
    }

    out
}
