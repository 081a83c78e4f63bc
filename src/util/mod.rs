pub mod mentions;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use std::fmt;

/// Deserializes a 64-bit id that the wire may encode as either a JSON
/// number or a decimal string.
pub(crate) fn u64_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct U64Visitor;

    impl Visitor<'_> for U64Visitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("id out of range"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.parse().map_err(|_| E::custom("id is not a decimal string"))
        }
    }

    deserializer.deserialize_any(U64Visitor)
}

/// Deserializes a boolean the wire may encode as a bool, a 0/1 number,
/// or a "0"/"1" string.
pub(crate) fn bool_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct BoolVisitor;

    impl Visitor<'_> for BoolVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean, 0/1 number, or \"0\"/\"1\" string")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            Ok(v != "0" && !v.is_empty())
        }
    }

    deserializer.deserialize_any(BoolVisitor)
}

/// `bool_from_any` for fields that distinguish "absent" from "false".
pub(crate) fn bool_from_any_opt<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    bool_from_any(deserializer).map(Some)
}

/// Parses an RFC 3339 timestamp, returning `None` on malformed input
/// rather than failing the surrounding payload.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::parse_timestamp;

    #[test]
    fn test_parse_timestamp() {
        let parsed = parse_timestamp("2021-10-03T18:01:00+08:00").unwrap();
        assert_eq!(parsed.timestamp(), 1633255260);
        assert!(parse_timestamp("yesterday-ish").is_none());
    }
}
