//! Tracing setup. The wizard owns the terminal, so it logs to a file under
//! `<state>/logs`; every other command logs to stderr.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Keeps the file writer alive; drop it last so buffered lines are flushed
pub struct LoggingHandle {
    _guard: Option<WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LoggingHandle {
    /// Session log file, when logging to a file
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    File { dir: PathBuf, name: String },
    Stderr,
}

pub fn log_file_name(started: DateTime<Utc>) -> String {
    format!("formstash-{}.log", started.format("%Y%m%dT%H%M%SZ"))
}

fn logs_to_file(config: &Config, is_tui_mode: bool) -> bool {
    is_tui_mode && config.logging.to_file
}

fn log_sink(config: &Config, is_tui_mode: bool, started: DateTime<Utc>) -> LogSink {
    if logs_to_file(config, is_tui_mode) {
        LogSink::File {
            dir: config.logs_path(),
            name: log_file_name(started),
        }
    } else {
        LogSink::Stderr
    }
}

/// `--debug` beats the configured level; `RUST_LOG` beats both
fn env_filter(config: &Config, debug: bool) -> EnvFilter {
    let level = if debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init_logging(config: &Config, is_tui_mode: bool, debug: bool) -> Result<LoggingHandle> {
    let filter = env_filter(config, debug);

    let (writer, guard, log_file) = match log_sink(config, is_tui_mode, Utc::now()) {
        LogSink::File { dir, name } => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create logs directory {}", dir.display()))?;
            let (non_blocking, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, &name));
            (
                BoxMakeWriter::new(non_blocking),
                Some(guard),
                Some(dir.join(name)),
            )
        }
        LogSink::Stderr => (BoxMakeWriter::new(std::io::stderr), None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(log_file.is_none())
                .with_writer(writer),
        )
        .init();

    Ok(LoggingHandle {
        _guard: guard,
        log_file,
    })
}
