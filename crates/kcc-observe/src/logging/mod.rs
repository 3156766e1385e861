mod config;
mod error;
mod format;
mod layers;
mod level;
mod timestamp;
mod timezone;

#[cfg(feature = "offset-refresh")]
mod refresh;

pub use config::LogConfig;
pub use error::{LogError, LogResult};
pub use format::LogFormat;
pub use level::LogLevel;
pub use timestamp::LogTimestamp;
pub use timezone::{LogTimeZone, init_local_offset, refresh_local_offset};

#[cfg(feature = "offset-refresh")]
pub use refresh::{OFFSET_REFRESH_PERIOD, spawn_offset_refresh};

/// Install the global tracing subscriber described by `cfg`.
///
/// With [`LogTimeZone::Local`], call [`init_local_offset`] from `main()` before the tokio
/// runtime starts; the offset cannot be detected once other threads exist.
///
/// # Examples
/// ```rust
/// use kcc_observe::{LogConfig, init_logging};
///
/// let config = LogConfig::default();
/// init_logging(&config).expect("logging is initialized once");
/// tracing::info!("scheduler starting");
/// ```
pub fn init_logging(cfg: &LogConfig) -> LogResult<()> {
    match cfg.format {
        LogFormat::Text => layers::text(cfg),
        LogFormat::Json => layers::json(cfg),
        LogFormat::Journald => layers::journald(cfg),
    }
}
