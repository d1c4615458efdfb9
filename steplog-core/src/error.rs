use thiserror::Error;

use crate::models::SourceId;
use crate::sink::SinkError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Log stream for {0} is closed")]
    StreamClosed(SourceId),

    #[error("Log stream for {0} not found")]
    StreamNotFound(SourceId),

    #[error("Persistence sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SinkError> for Error {
    fn from(err: SinkError) -> Self {
        Self::SinkUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
