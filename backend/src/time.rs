use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};

/// Milliseconds since the Unix epoch. Lock leases and wait/run stats do
/// their arithmetic on this.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// UTC timestamp in a fixed-width RFC 3339 form, so stored text
/// timestamps compare lexicographically in time order.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
