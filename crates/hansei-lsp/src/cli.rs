use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "hansei-lsp",
    author,
    version,
    about = "Language server publishing Hansei analysis results as diagnostics",
    long_about = "Hansei LSP runs the configured analyzer on open documents, merges the results with \
                  taint vulnerabilities from the bound server and publishes them as diagnostics.\n\n\
                  Project settings are read from hansei.toml. Logs go to stderr unless --log-file is set."
)]
pub struct Cli {
    #[arg(long, value_enum, default_value = "info", help = "Set the log level")]
    pub log_level: LogLevel,

    #[arg(long, help = "Write logs to the specified file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, help = "Output logs in JSON format")]
    pub log_json: bool,

    #[arg(
        long,
        value_name = "PATH",
        help = "Use this configuration file instead of searching for hansei.toml"
    )]
    pub config: Option<PathBuf>,
}
