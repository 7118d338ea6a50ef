//! Human-readable durations in stage configs (`"1s"`, `"250ms"`, `"2m"`).
//!
//! A bare number is read as milliseconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer, de};

/// Parse `<integer><unit>` with unit one of `ns`, `us`, `ms`, `s`, `m`, `h`.
pub fn parse(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid duration '{s}': missing number"));
    }
    let n: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration '{s}': {e}"))?;

    let d = match unit.trim() {
        "ns" => Duration::from_nanos(n),
        "us" => Duration::from_micros(n),
        "" | "ms" => Duration::from_millis(n),
        "s" => Duration::from_secs(n),
        "m" => Duration::from_secs(n.saturating_mul(60)),
        "h" => Duration::from_secs(n.saturating_mul(3600)),
        other => return Err(format!("invalid duration '{s}': unknown unit '{other}'")),
    };
    Ok(d)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Millis(u64),
    Text(String),
}

/// `deserialize_with` helper.
pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    match Raw::deserialize(d)? {
        Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
        Raw::Text(s) => parse(&s).map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse("15us").unwrap(), Duration::from_micros(15));
        assert_eq!(parse("40").unwrap(), Duration::from_millis(40));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("fast").is_err());
        assert!(parse("10 parsecs").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn deserializes_number_or_string() {
        #[derive(Deserialize)]
        struct C {
            #[serde(deserialize_with = "deserialize")]
            t: Duration,
        }
        let c: C = serde_json::from_str(r#"{"t": "3s"}"#).unwrap();
        assert_eq!(c.t, Duration::from_secs(3));
        let c: C = serde_json::from_str(r#"{"t": 500}"#).unwrap();
        assert_eq!(c.t, Duration::from_millis(500));
    }
}
