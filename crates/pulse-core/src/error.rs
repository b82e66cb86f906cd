//! Error types for the scoring core and its session plumbing.

use crate::snapshot::MetricKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PulseError {
    /// Ticks must arrive in strictly increasing order within a session.
    #[error("out-of-order tick: got {got}, last accepted was {last}")]
    OutOfOrderTick { last: u64, got: u64 },

    /// A snapshot with a non-finite metric reached the forest.
    #[error("tick {tick} has no usable value for {metric:?}")]
    IncompleteSnapshot { tick: u64, metric: MetricKind },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already exists: {0}")]
    SessionExists(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PulseError>;
