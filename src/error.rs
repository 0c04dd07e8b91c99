use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by environments and the wrappers stacked on top of them.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("action has {actual} components, expected {expected}")]
    ActionDimension { expected: usize, actual: usize },
    #[error("episode is over; call reset before stepping again")]
    EpisodeOver,
    #[error("environment has not been reset")]
    NotReset,
    #[error("environment is closed")]
    Closed,
    #[error("no wrapper or environment exposes attribute `{0}`")]
    MissingAttribute(String),
    #[error("attribute `{name}` does not hold a {expected}")]
    AttributeType {
        name: String,
        expected: &'static str,
    },
    #[error("attribute `{0}` is read-only")]
    ReadOnlyAttribute(String),
    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EnvError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by the experiment driver and the trainer.
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode checkpoint: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("failed to record policy weights: {0}")]
    Recorder(#[from] burn::record::RecorderError),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(&'static str),
    #[error("invalid trainer configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("failed to render chart: {0}")]
    Chart(String),
}
