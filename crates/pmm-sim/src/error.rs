//! Error types for pmm-sim.

use pmm_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Replay line {line}: {message}")]
    Replay { line: usize, message: String },

    #[error("Invalid clock: {0}")]
    InvalidClock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

pub type SimResult<T> = Result<T, SimError>;
