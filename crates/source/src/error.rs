use faststr::FastStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(FastStr),

    #[error("cannot write the tree root")]
    RootWrite,

    #[error("source closed")]
    SourceClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
