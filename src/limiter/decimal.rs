//! Fixed-point values as decimal strings
//!
//! JSON numbers lose precision above 2^53 and buffered serde content has
//! no 128-bit integers, so levels and rates travel as strings. Plain
//! integers are still accepted on input.

use serde::{de, Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Text(String),
    Number(u64),
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Text(text) => text.trim().parse().map_err(de::Error::custom),
        Repr::Number(n) => Ok(n as u128),
    }
}

#[cfg(test)]
mod tests {
    use crate::limiter::{DefaultLimit, LIMIT_UNIT};

    #[test]
    fn test_large_values_survive_json() {
        let limit = DefaultLimit {
            max_limit: 1_000 * LIMIT_UNIT,
            rate_per_second: LIMIT_UNIT / 3,
        };
        let json = serde_json::to_string(&limit).unwrap();
        assert!(json.contains("\"1000000000000000000000\""));
        assert_eq!(serde_json::from_str::<DefaultLimit>(&json).unwrap(), limit);

        let plain: DefaultLimit =
            serde_json::from_str(r#"{"max_limit": 5, "rate_per_second": "7"}"#).unwrap();
        assert_eq!(plain.max_limit, 5);
        assert_eq!(plain.rate_per_second, 7);
    }
}
