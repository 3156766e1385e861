use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::logging::{
    config::LogConfig,
    error::{LogError, LogResult},
    timestamp::LogTimestamp,
};

pub(crate) fn text(cfg: &LogConfig) -> LogResult<()> {
    let layer = fmt::layer()
        .with_ansi(cfg.should_use_color())
        .with_target(cfg.with_targets)
        .with_timer(LogTimestamp::new(cfg.tz));

    install(
        tracing_subscriber::registry()
            .with(cfg.level.to_env_filter())
            .with(layer),
    )
}

pub(crate) fn json(cfg: &LogConfig) -> LogResult<()> {
    let layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_current_span(true)
        .with_timer(LogTimestamp::new(cfg.tz));

    install(
        tracing_subscriber::registry()
            .with(cfg.level.to_env_filter())
            .with(layer),
    )
}

#[cfg(target_os = "linux")]
pub(crate) fn journald(cfg: &LogConfig) -> LogResult<()> {
    let layer = tracing_journald::layer()
        .map_err(|e| LogError::JournaldInitFailed(e.to_string()))?
        .with_syslog_identifier("kcc-schedulerd".to_string());

    install(
        tracing_subscriber::registry()
            .with(cfg.level.to_env_filter())
            .with(layer),
    )
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn journald(_cfg: &LogConfig) -> LogResult<()> {
    Err(LogError::JournaldNotSupported)
}

fn install<S>(subscriber: S) -> LogResult<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber
        .try_init()
        .map_err(|_| LogError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_initialized() {
        let cfg = LogConfig {
            use_color: false,
            ..Default::default()
        };

        // The first install in this test binary may succeed or lose a race with another test.
        let _ = text(&cfg);
        match json(&cfg) {
            Err(LogError::AlreadyInitialized) => {}
            other => panic!("expected AlreadyInitialized, got {other:?}"),
        }
    }
}
