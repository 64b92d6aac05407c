pub mod config;
pub mod engine;

use config::Config;
use tracing_appender::non_blocking::WorkerGuard;

/// Installs the global subscriber. Logs go to a daily file under `log_dir`
/// when configured, otherwise to stderr. Keep the guard alive for the
/// lifetime of the process so buffered file output is flushed.
pub fn init_logging(config: &Config) -> Option<WorkerGuard> {
    match &config.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "tempest.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt().with_writer(non_blocking).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            None
        }
    }
}
