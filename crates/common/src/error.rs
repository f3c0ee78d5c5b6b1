use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("Candle is not complete and cannot be stored")]
    IncompleteCandle,

    #[error("Candle at {got} does not follow last stored candle at {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("Broker unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Broker rejected instruction: {0}")]
    CollaboratorRejected(String),

    #[error("No such {kind} strategy: '{name}'")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors a polling loop absorbs and retries on its next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::CollaboratorUnavailable(_) | Error::InsufficientData { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
