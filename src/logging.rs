// 📝 Logging - console + run_log.txt in the working folder
//
// The returned guard flushes the file writer on drop; keep it alive in main.

use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::never;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter::EnvFilter, Layer, Registry};

pub const DEFAULT_LOG_FILE: &str = "run_log.txt";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(dir: &Path, file_name: &str) -> anyhow::Result<WorkerGuard> {
    let console_layer = layer()
        .with_target(false)
        .with_thread_names(true)
        .with_writer(io::stdout)
        .with_filter(env_filter());

    let (writer, guard) = tracing_appender::non_blocking(never(dir, file_name));
    let file_layer = layer()
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(writer)
        .with_filter(env_filter());

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    Ok(guard)
}
