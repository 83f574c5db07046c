//! # Logging Utilities
//!
//! `tracing` subscriber setup for livelink.
//!
//! Compiler output, discovery progress and relink results are all plain
//! `tracing` events; this module decides where they go:
//! - console (pretty or JSON), optionally mirrored to a daily log file
//! - file only, for hosts that embed the rebuild loop and own the console
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use livelink_utils::init_logging;
//!
//! init_logging().expect("Failed to initialize logging");
//! tracing::info!("Watching sources");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=livelink_core=debug`)
//! - `LIVELINK_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `LIVELINK_LOG_FILE`: Also write to this file, rotated daily

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(format!("{s}. Use 'pretty' or 'json'"))),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    /// Default
    Info,
    Debug,
    /// Includes per-record parser detail
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(format!(
                "{s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            ))),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize console logging from the environment.
///
/// Reads `RUST_LOG`, `LIVELINK_LOG_FORMAT` and `LIVELINK_LOG_FILE`.
///
/// ## Errors
///
/// - `InvalidFormat`: `LIVELINK_LOG_FORMAT` is set to something unknown
/// - `FileError`: the `LIVELINK_LOG_FILE` directory could not be created
/// - `InitializationFailed`: a global subscriber is already installed
pub fn init_logging() -> Result<(), LoggingError>
{
    let format = match env::var("LIVELINK_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::Pretty,
    };
    init_console(format, None)
}

/// Initialize console logging with an explicit level, ignoring `RUST_LOG`.
///
/// `LIVELINK_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Same as [`init_logging`].
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<(), LoggingError>
{
    init_console(format, Some(level.into()))
}

/// Initialize logging to `log_file` only; nothing is written to the console.
///
/// Meant for hosts that run the rebuild loop in-process, where console
/// output belongs to the host. Returns the path written to.
///
/// ## Errors
///
/// - `FileError`: the log directory could not be created
/// - `InitializationFailed`: a global subscriber is already installed
pub fn init_logging_to_file(
    log_file: impl Into<PathBuf>,
    level: Option<LogLevel>,
    format: LogFormat,
) -> Result<PathBuf, LoggingError>
{
    let log_file = log_file.into();
    let filter = env_filter(level.map(Into::into));
    let writer = file_writer(&log_file, false)?;
    let layer = format_layer(format, writer, false).with_filter(filter).boxed();
    install(vec![layer])?;
    Ok(log_file)
}

/// `~/.livelink/YYYY-MM-DD-livelink.log`, or the same name in the temp
/// directory when there is no home directory.
#[must_use]
pub fn default_log_file() -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    let name = format!("{today}-livelink.log");
    match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        Some(home) => PathBuf::from(home).join(".livelink").join(name),
        None => env::temp_dir().join(name),
    }
}

fn init_console(format: LogFormat, explicit_level: Option<Level>) -> Result<(), LoggingError>
{
    let mut layers = vec![format_layer(format, io::stdout, true)
        .with_filter(env_filter(explicit_level))
        .boxed()];

    if let Some(log_file) = env::var_os("LIVELINK_LOG_FILE").map(PathBuf::from) {
        let writer = file_writer(&log_file, true)?;
        layers.push(
            format_layer(format, writer, false)
                .with_filter(env_filter(explicit_level))
                .boxed(),
        );
    }
    install(layers)
}

/// Explicit level first, then `RUST_LOG`, then `INFO`
fn env_filter(explicit_level: Option<Level>) -> EnvFilter
{
    match explicit_level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    }
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_writer(log_file: &Path, rotate_daily: bool) -> Result<NonBlocking, LoggingError>
{
    let directory = match log_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&directory)?;
    let file_name = log_file.file_name().unwrap_or_default();

    let appender = if rotate_daily {
        tracing_appender::rolling::daily(&directory, file_name)
    } else {
        tracing_appender::rolling::never(&directory, file_name)
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    // The subscriber is global, so the worker must live as long as the process
    std::mem::forget(guard);
    Ok(non_blocking)
}

fn install(layers: Vec<BoxedLayer>) -> Result<(), LoggingError>
{
    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// A global subscriber is already installed
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
