use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Default filter: our own crates at info, noisy actix internals muted.
pub const DEFAULT_FILTER: &str = "info,actix_server=warn,actix_http::h1::dispatcher=off";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Logging setup resolved from the environment at startup.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Tee output into a daily rotated file under `directory`.
    pub to_file: bool,
    pub directory: String,
    pub file_prefix: String,
    /// Overrides [`DEFAULT_FILTER`]; usually taken from `RUST_LOG`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            to_file: false,
            directory: "./logs".into(),
            file_prefix: "keyward-server.log".into(),
            filter: None,
        }
    }
}

/// Install the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for the
/// lifetime of the process when file logging is enabled.
pub fn init_tracing(config: &LogConfig) -> Option<WorkerGuard> {
    let filter = config.filter.as_deref().unwrap_or(DEFAULT_FILTER).to_string();

    if config.to_file {
        let file_appender = tracing_appender::rolling::RollingFileAppender::new(
            tracing_appender::rolling::Rotation::DAILY,
            &config.directory,
            &config.file_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(non_blocking.and(std::io::stdout))
            .with_file(true)
            .with_line_number(true)
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
            .init();

        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stdout)
            .with_file(true)
            .with_line_number(true)
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
            .init();

        None
    }
}
