pub mod data;
pub mod error;

mod log;

pub use log::logging_stdout;
