use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    prelude::*,
};

use crate::cli::{Cli, LogLevel};

/// Overrides `--log-level` with a full filter, e.g. `hansei_lsp=trace,reqwest=warn`.
pub const LOG_ENV_VAR: &str = "HANSEI_LOG";

const DEFAULT_LOG_FILE: &str = "hansei-lsp.log";

/// stdout carries the protocol, so logs go to stderr or to `--log-file`.
pub fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let filter = log_filter(cli.log_level);

    let (writer, guard) = match &cli.log_file {
        Some(path) => {
            let (directory, file_name) = log_file_location(path);
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);
    let registry = tracing_subscriber::registry().with(filter);

    if cli.log_json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }

    guard
}

fn log_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.as_tracing_level().into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy()
}

fn log_file_location(path: &Path) -> (PathBuf, String) {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (directory, file_name)
}
