use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

/// Install the global subscriber writing to stdout. Keep the returned guard
/// alive for the life of the process or buffered lines are lost.
pub fn logging_stdout() -> impl Drop {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let default_level = if cfg!(debug_assertions) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_target(true))
        .with(filter)
        .init();

    guard
}
