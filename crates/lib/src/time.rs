//! Millisecond instants shared by messages and timeline events.
//!
//! The wire uses epoch milliseconds; persisted history uses ISO-8601 strings with exactly
//! three fractional digits (`2023-11-14T22:13:20.000Z`). Both decode paths accept either form.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Current time truncated to whole milliseconds.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn from_epoch_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub fn to_iso_millis(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInstant {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl RawInstant {
    fn into_instant(self) -> Result<DateTime<Utc>, String> {
        match self {
            RawInstant::Millis(ms) => {
                from_epoch_millis(ms).ok_or_else(|| format!("timestamp out of range: {}", ms))
            }
            RawInstant::Float(f) => from_epoch_millis(f as i64)
                .ok_or_else(|| format!("timestamp out of range: {}", f)),
            RawInstant::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|d| d.with_timezone(&Utc).trunc_subsecs(3))
                .map_err(|e| format!("invalid timestamp {:?}: {}", s, e)),
        }
    }
}

/// Serde adapter for required instants stored as ISO strings.
pub mod iso_millis {
    use super::*;

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&to_iso_millis(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        RawInstant::deserialize(d)?
            .into_instant()
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional wire instants (epoch millis, possibly absent or null).
pub mod opt_epoch_millis {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<RawInstant>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => raw.into_instant().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_format_has_three_fraction_digits() {
        let t = from_epoch_millis(1_700_000_000_000).unwrap();
        assert_eq!(to_iso_millis(&t), "2023-11-14T22:13:20.000Z");
        let t = from_epoch_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_iso_millis(&t), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn now_has_no_sub_millisecond_part() {
        let t = now();
        assert_eq!(t.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn raw_instant_accepts_numbers_and_strings() {
        let a: RawInstant = serde_json::from_str("1700000000000").unwrap();
        let b: RawInstant = serde_json::from_str("\"2023-11-14T22:13:20.000Z\"").unwrap();
        let c: RawInstant = serde_json::from_str("1700000000000.0").unwrap();
        let a = a.into_instant().unwrap();
        assert_eq!(a, b.into_instant().unwrap());
        assert_eq!(a, c.into_instant().unwrap());
    }

    #[test]
    fn garbage_text_is_rejected() {
        let raw: RawInstant = serde_json::from_str("\"yesterday\"").unwrap();
        assert!(raw.into_instant().is_err());
    }
}
