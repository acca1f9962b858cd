//! Logging initialization for toolkit processes.
//!
//! ```rust,no_run
//! use atp_client::LoggingConfig;
//!
//! // Stderr-only (no guard needed)
//! LoggingConfig::stderr().init()?;
//!
//! // File logging (guard must be held)
//! let _guard = LoggingConfig::production("/var/log/toolkit").init()?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! | Output | Guard | Why |
//! |--------|-------|-----|
//! | `Stderr` | No | Direct writes |
//! | `FileOnly` | **Yes** | Non-blocking writer buffers logs |
//! | `Both` | **Yes** | File component needs flushing |
//! | `None` | No | No logging |

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// Standard error only.
    #[default]
    Stderr,
    /// Rolling files only.
    FileOnly,
    /// Standard error and rolling files.
    Both,
    /// Logging disabled.
    None,
}

/// How often log files roll over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// Every minute.
    Minute,
    /// Every hour.
    Hourly,
    /// Every day.
    Daily,
    /// Never.
    #[default]
    Never,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable text.
    pub structured: bool,
    /// Output target.
    pub output: LogOutput,
    /// Directory for log files.
    pub directory: Option<PathBuf>,
    /// Log file name prefix.
    pub file_prefix: String,
    /// File rotation.
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: false,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "atp-toolkit".to_string(),
            rotation: LogRotation::Never,
        }
    }
}

impl LoggingConfig {
    /// Human-readable `info` logs on stderr.
    pub fn stderr() -> Self {
        Self::default()
    }

    /// `debug` logs on stderr.
    pub fn stderr_debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// JSON logs to stderr and hourly files under `dir`.
    pub fn production(dir: impl Into<PathBuf>) -> Self {
        Self {
            structured: true,
            output: LogOutput::Both,
            directory: Some(dir.into()),
            rotation: LogRotation::Hourly,
            ..Self::default()
        }
    }

    /// Set the filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Initialize the global subscriber.
    ///
    /// Returns `Some(LoggingGuard)` for file-based logging, which must be held
    /// until exit, or `None` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if file output has no directory, the directory cannot be
    /// created, or a global subscriber is already set.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                self.install(filter, io::stderr)?;
                Ok(None)
            }
            LogOutput::FileOnly => {
                let (writer, file_guard) = tracing_appender::non_blocking(self.appender()?);
                self.install(filter, writer)?;
                Ok(Some(LoggingGuard {
                    _file_guard: file_guard,
                    _stderr_guard: None,
                }))
            }
            LogOutput::Both => {
                let (file_writer, file_guard) = tracing_appender::non_blocking(self.appender()?);
                let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(io::stderr());
                self.install(filter, file_writer.and(stderr_writer))?;
                Ok(Some(LoggingGuard {
                    _file_guard: file_guard,
                    _stderr_guard: Some(stderr_guard),
                }))
            }
        }
    }

    fn appender(&self) -> io::Result<RollingFileAppender> {
        let dir = self.directory.as_deref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "File logging requires a directory",
            )
        })?;
        std::fs::create_dir_all(dir)?;
        Ok(rolling(dir, &self.file_prefix, self.rotation))
    }

    fn install<W>(&self, filter: EnvFilter, writer: W) -> io::Result<()>
    where
        W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
    {
        let subscriber = tracing_subscriber::registry().with(filter);
        let result = if self.structured {
            subscriber
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            subscriber.with(fmt::layer().with_writer(writer)).try_init()
        };
        result.map_err(|e| io::Error::other(e.to_string()))
    }
}

fn rolling(dir: &Path, prefix: &str, rotation: LogRotation) -> RollingFileAppender {
    match rotation {
        LogRotation::Minute => tracing_appender::rolling::minutely(dir, prefix),
        LogRotation::Hourly => tracing_appender::rolling::hourly(dir, prefix),
        LogRotation::Daily => tracing_appender::rolling::daily(dir, prefix),
        LogRotation::Never => tracing_appender::rolling::never(dir, prefix),
    }
}

/// Flushes buffered file logs on drop. Hold it for the life of the process.
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
    _stderr_guard: Option<WorkerGuard>,
}
