//! Serde helpers that encode a `Duration` as a compact string such as
//! `"300s"` or `"1500ms"`. Use with `#[serde(with = "duration_serde")]`.

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Whole seconds render as `"Ns"`, everything else as `"Nms"`.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms > 0 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

/// Parse `ms`, `s`, `m`, `h` or `d` suffixed integers.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit_ms): (&str, u64) = if let Some(val) = s.strip_suffix("ms") {
        (val, 1)
    } else if let Some(val) = s.strip_suffix('s') {
        (val, 1_000)
    } else if let Some(val) = s.strip_suffix('m') {
        (val, 60_000)
    } else if let Some(val) = s.strip_suffix('h') {
        (val, 3_600_000)
    } else if let Some(val) = s.strip_suffix('d') {
        (val, 86_400_000)
    } else {
        return Err(format!("unknown duration format: {}", s));
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    n.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration overflows: {}", s))
}
