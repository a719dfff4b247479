use thiserror::Error;

/// Errors surfaced by the bot's collaborators and decision engine.
///
/// Recoverable variants skip the current cycle (or leave a compensated
/// position state behind); everything else stops the trading loop.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Insufficient data: need {needed} candles, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BotError {
    /// Whether the trading loop may carry on after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BotError::DataUnavailable(_)
                | BotError::InsufficientData { .. }
                | BotError::OrderRejected(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
