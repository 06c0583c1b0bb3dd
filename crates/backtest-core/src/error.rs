use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No bars supplied to the simulation")]
    EmptyData,

    #[error("Signal count {signals} does not match bar count {bars}")]
    SignalMismatch { bars: usize, signals: usize },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Simulation cancelled")]
    Cancelled,

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
