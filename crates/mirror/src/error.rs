use faststr::FastStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    MsgError(FastStr),

    #[error("source error: {0}")]
    Source(#[from] source::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
