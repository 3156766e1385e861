use std::{
    fmt,
    str::FromStr,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::UtcOffset;
use tracing::debug;

use crate::logging::error::LogError;

/// Offset used for [`LogTimeZone::Local`] timestamps.
static LOCAL_OFFSET: RwLock<UtcOffset> = RwLock::new(UtcOffset::UTC);

/// Timezone of log timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogTimeZone {
    #[default]
    Utc,
    /// System timezone as detected by [`init_local_offset`].
    Local,
}

impl LogTimeZone {
    pub(crate) fn offset(self) -> UtcOffset {
        match self {
            LogTimeZone::Utc => UtcOffset::UTC,
            LogTimeZone::Local => *LOCAL_OFFSET.read().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl FromStr for LogTimeZone {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "utc" => Ok(Self::Utc),
            "local" => Ok(Self::Local),
            _ => Err(LogError::InvalidTimeZone(s.to_string())),
        }
    }
}

impl fmt::Display for LogTimeZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogTimeZone::Utc => "utc",
            LogTimeZone::Local => "local",
        })
    }
}

impl Serialize for LogTimeZone {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LogTimeZone {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Detect the local UTC offset.
///
/// **Call in `main()` before the tokio runtime starts.** On most Unix platforms the offset
/// cannot be read once the process has more than one thread; detection then falls back to UTC.
///
/// ```no_run
/// fn main() {
///     kcc_observe::init_local_offset();
///
///     let rt = tokio::runtime::Runtime::new().unwrap();
///     rt.block_on(async { /* ... */ });
/// }
/// ```
pub fn init_local_offset() {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    *LOCAL_OFFSET.write().unwrap_or_else(PoisonError::into_inner) = offset;
}

/// Re-read the local offset, picking up DST transitions.
///
/// Returns `true` if the offset changed. Leaves the cached offset alone when detection is
/// impossible from the calling context.
pub fn refresh_local_offset() -> bool {
    let Ok(detected) = UtcOffset::current_local_offset() else {
        debug!("local offset refresh skipped: detection unavailable");
        return false;
    };
    let mut current = LOCAL_OFFSET.write().unwrap_or_else(PoisonError::into_inner);
    if *current == detected {
        return false;
    }
    debug!(
        from = %format_offset(*current),
        to = %format_offset(detected),
        "local offset changed"
    );
    *current = detected;
    true
}

/// `UTC±HH` or `UTC±HH:MM`.
fn format_offset(offset: UtcOffset) -> String {
    let hours = offset.whole_hours();
    let minutes = offset.minutes_past_hour();
    if minutes == 0 {
        format!("UTC{hours:+03}")
    } else {
        format!("UTC{hours:+03}:{:02}", minutes.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitive() {
        assert_eq!("UTC".parse::<LogTimeZone>().unwrap(), LogTimeZone::Utc);
        assert_eq!("Local".parse::<LogTimeZone>().unwrap(), LogTimeZone::Local);
        assert!("pst".parse::<LogTimeZone>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(serde_json::to_string(&LogTimeZone::Local).unwrap(), r#""local""#);
        let tz: LogTimeZone = serde_json::from_str(r#""UTC""#).unwrap();
        assert_eq!(tz, LogTimeZone::Utc);
    }

    #[test]
    fn utc_offset_is_zero() {
        assert_eq!(LogTimeZone::Utc.offset(), UtcOffset::UTC);
    }

    #[test]
    fn local_offset_is_plausible_after_init() {
        init_local_offset();
        assert!(LogTimeZone::Local.offset().whole_hours().abs() <= 14);
    }

    #[test]
    fn format_offset_variants() {
        assert_eq!(format_offset(UtcOffset::UTC), "UTC+00");
        assert_eq!(format_offset(UtcOffset::from_hms(3, 30, 0).unwrap()), "UTC+03:30");
        assert_eq!(format_offset(UtcOffset::from_hms(-5, 0, 0).unwrap()), "UTC-05");
    }
}
