use thiserror::Error;

/// Errors surfaced by an exchange client
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("insufficient margin for {symbol}")]
    InsufficientMargin { symbol: String },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("exchange API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("failed to decode exchange response: {0}")]
    Decode(String),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Why a worker cycle ended without (or after partially) acting.
///
/// Every variant is recovered inside the worker loop; none is fatal.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("setup not eligible: {0}")]
    IneligibleSetup(String),

    #[error("sizing rejected: {0}")]
    SizingRejected(String),

    #[error("entry order rejected: {0}")]
    OrderRejected(String),

    #[error("insufficient margin for entry on {0}")]
    InsufficientMargin(String),

    #[error("position {trade_id} on {symbol} is open without protection: {reason}")]
    ProtectionAttachFailed {
        symbol: String,
        trade_id: String,
        reason: String,
    },
}

impl CycleError {
    /// Only an unprotected open position needs a high-severity alert
    pub fn is_alert(&self) -> bool {
        matches!(self, CycleError::ProtectionAttachFailed { .. })
    }
}

impl From<ExchangeError> for CycleError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::InsufficientMargin { symbol } => CycleError::InsufficientMargin(symbol),
            ExchangeError::OrderRejected(msg) => CycleError::OrderRejected(msg),
            other => CycleError::DataUnavailable(other.to_string()),
        }
    }
}

/// Errors from trade journal backends
#[derive(Error, Debug)]
pub enum JournalError {
    #[error("unknown trade id: {0}")]
    UnknownTrade(String),

    #[error("{0} cannot be stored as a decimal")]
    InvalidNumber(f64),

    #[error("corrupt journal row: {0}")]
    CorruptRow(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_mapping() {
        let err: CycleError = ExchangeError::InsufficientMargin {
            symbol: "SOLUSDT".to_string(),
        }
        .into();
        assert!(matches!(err, CycleError::InsufficientMargin(_)));

        let err: CycleError = ExchangeError::Decode("bad json".to_string()).into();
        assert!(matches!(err, CycleError::DataUnavailable(_)));
    }

    #[test]
    fn test_only_protection_failure_alerts() {
        let err = CycleError::ProtectionAttachFailed {
            symbol: "SOLUSDT".to_string(),
            trade_id: "t-1".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(err.is_alert());
        assert!(!CycleError::SizingRejected("zero stop".to_string()).is_alert());
    }
}
