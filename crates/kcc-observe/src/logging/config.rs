use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::logging::{format::LogFormat, level::LogLevel, timezone::LogTimeZone};

/// Logging section of a daemon configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Filter expression, e.g. `"info"` or `"kcc_core=debug,info"`.
    pub level: LogLevel,
    /// Timezone of text and JSON timestamps.
    pub tz: LogTimeZone,
    /// Include the event target (module path).
    pub with_targets: bool,
    /// Colored text output. Ignored unless stdout is a terminal.
    pub use_color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::default(),
            tz: LogTimeZone::default(),
            with_targets: true,
            use_color: true,
        }
    }
}

impl LogConfig {
    /// Whether ANSI colors should be emitted, checked against the current stdout.
    pub fn should_use_color(&self) -> bool {
        self.use_color && std::io::stdout().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = LogConfig::default();

        assert_eq!(cfg.format, LogFormat::Text);
        assert_eq!(cfg.level.as_str(), "info");
        assert_eq!(cfg.tz, LogTimeZone::Utc);
        assert!(cfg.with_targets);
        assert!(cfg.use_color);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: LogConfig =
            serde_json::from_str(r#"{"format": "json", "level": "kcc_core=debug,info"}"#).unwrap();

        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level.as_str(), "kcc_core=debug,info");
        assert_eq!(cfg.tz, LogTimeZone::Utc);
        assert!(cfg.with_targets);
    }

    #[test]
    fn invalid_level_is_rejected_at_parse_time() {
        let err = serde_json::from_str::<LogConfig>(r#"{"level": "kcc_core=loud"}"#);
        assert!(err.is_err(), "expected parse failure, got {err:?}");
    }

    #[test]
    fn color_requires_opt_in() {
        let cfg = LogConfig {
            use_color: false,
            ..Default::default()
        };
        assert!(!cfg.should_use_color());
    }
}
