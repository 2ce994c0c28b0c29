use faststr::FastStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The source refused the subscription, or dropped it before delivering
    /// a first value.
    #[error("source unavailable for key {0}")]
    SourceUnavailable(FastStr),

    #[error("source error: {0}")]
    Source(#[from] source::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
