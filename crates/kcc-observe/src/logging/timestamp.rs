use std::fmt;

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

use crate::logging::timezone::LogTimeZone;

/// RFC 3339 timer for `tracing-subscriber` in the configured timezone.
///
/// The local offset is read on every event, so [`crate::refresh_local_offset`] takes effect
/// without reinstalling the subscriber.
#[derive(Debug, Clone, Copy)]
pub struct LogTimestamp {
    tz: LogTimeZone,
}

impl LogTimestamp {
    pub fn new(tz: LogTimeZone) -> Self {
        Self { tz }
    }
}

impl FormatTime for LogTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_utc().to_offset(self.tz.offset());
        match now.format(&Rfc3339) {
            Ok(ts) => write!(w, "{ts} "),
            Err(_) => write!(w, "<invalid-time> "),
        }
    }
}
