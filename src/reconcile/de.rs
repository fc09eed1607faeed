//! Serde helpers for loosely typed parameter values.
//!
//! Playbook values often arrive as strings (`priority: "10"`,
//! `maxdepth: ""`); these helpers coerce them to integers.

use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;

fn coerce<E: serde::de::Error>(value: &Value) -> Result<Option<i64>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| E::custom(format!("expected an integer, got {n}"))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| E::custom(format!("expected an integer, got \"{s}\""))),
        other => Err(E::custom(format!("expected an integer, got {other}"))),
    }
}

/// An integer given as a number or a numeric string.
pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce::<D::Error>(&value)?.ok_or_else(|| D::Error::custom("expected an integer, got nothing"))
}

/// An optional integer; null and the empty string both mean `None`.
pub fn opt_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    coerce(&value)
}

/// An optional compound value (list or map); null and the empty string both
/// mean `None`.
pub fn opt_compound<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.is_empty() => Ok(None),
        value => serde_json::from_value(value).map(Some).map_err(D::Error::custom),
    }
}

/// A string that may be given as null.
pub fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "int")]
        priority: i64,
        #[serde(default, deserialize_with = "opt_int")]
        maxdepth: Option<i64>,
        #[serde(default, deserialize_with = "string_or_null")]
        pkg_filter: String,
    }

    #[test]
    fn test_coercions() {
        let s: Sample = serde_json::from_value(json!({"priority": "10", "maxdepth": ""})).unwrap();
        assert_eq!(s.priority, 10);
        assert_eq!(s.maxdepth, None);
        assert_eq!(s.pkg_filter, "");

        let s: Sample =
            serde_json::from_value(json!({"priority": 5, "maxdepth": "3", "pkg_filter": null}))
                .unwrap();
        assert_eq!(s.priority, 5);
        assert_eq!(s.maxdepth, Some(3));

        assert!(serde_json::from_value::<Sample>(json!({"priority": "high"})).is_err());
        assert!(serde_json::from_value::<Sample>(json!({"priority": ""})).is_err());
    }

    #[test]
    fn test_empty_compound_is_none() {
        #[derive(Debug, Deserialize)]
        struct Compound {
            #[serde(default, deserialize_with = "opt_compound")]
            groups: Option<Vec<String>>,
        }
        let c: Compound = serde_json::from_value(json!({"groups": ""})).unwrap();
        assert_eq!(c.groups, None);
        let c: Compound = serde_json::from_value(json!({"groups": []})).unwrap();
        assert_eq!(c.groups, Some(vec![]));
        assert!(serde_json::from_value::<Compound>(json!({"groups": 3})).is_err());
    }
}
