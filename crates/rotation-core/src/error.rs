use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invariant breach: {0}")]
    InvariantBreach(String),

    #[error("Data error: {0}")]
    DataError(String),
}
