//! Flat `Key=Value;...` configuration blob.
//!
//! Trainers and environments are configured with a semicolon-separated
//! property string such as
//! `TrainerType=PG.MT;RewardType=VAL;Gamma=0.99;Threads=2`.
//! The string is parsed once at initialization; unknown keys are retained
//! so environments can pick up their own settings from the same blob.

use std::collections::BTreeMap;
use std::fmt;

/// Error raised while parsing or reading properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// A segment was not of the form `Key=Value`.
    Malformed(String),
    /// A required key was absent.
    Missing(String),
    /// A key was present but its value could not be parsed as the
    /// requested type.
    Invalid { key: String, value: String },
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyError::Malformed(seg) => write!(f, "malformed property segment '{}'", seg),
            PropertyError::Missing(key) => write!(f, "missing required property '{}'", key),
            PropertyError::Invalid { key, value } => {
                write!(f, "invalid value '{}' for property '{}'", value, key)
            }
        }
    }
}

impl std::error::Error for PropertyError {}

/// Parsed set of `Key=Value` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    values: BTreeMap<String, String>,
}

impl PropertySet {
    /// Create an empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a semicolon-separated property string.
    ///
    /// Empty segments (trailing semicolons) are skipped. A segment without
    /// an `=` is a [`PropertyError::Malformed`].
    pub fn parse(text: &str) -> Result<Self, PropertyError> {
        let mut values = BTreeMap::new();
        for segment in text.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match segment.split_once('=') {
                Some((key, value)) => {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => return Err(PropertyError::Malformed(segment.to_string())),
            }
        }
        Ok(Self { values })
    }

    /// Insert or replace a property.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Raw string lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw lookup that fails with [`PropertyError::Missing`].
    pub fn require(&self, key: &str) -> Result<&str, PropertyError> {
        self.get(key).ok_or_else(|| PropertyError::Missing(key.to_string()))
    }

    /// Boolean property; accepts `true/false` in any case.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(PropertyError::Invalid {
                    key: key.to_string(),
                    value: v.to_string(),
                }),
            },
        }
    }

    /// Floating point property.
    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| PropertyError::Invalid {
                key: key.to_string(),
                value: v.to_string(),
            }),
        }
    }

    /// Unsigned integer property.
    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize, PropertyError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| PropertyError::Invalid {
                key: key.to_string(),
                value: v.to_string(),
            }),
        }
    }

    /// Serialize back to the `Key=Value;...` wire form.
    pub fn to_property_string(&self) -> String {
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Number of properties in the set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let props =
            PropertySet::parse("TrainerType=PG.MT;RewardType=VAL;Gamma=0.99;Threads=2").unwrap();
        assert_eq!(props.get("TrainerType"), Some("PG.MT"));
        assert_eq!(props.get("RewardType"), Some("VAL"));
        assert_eq!(props.get_f64("Gamma", 0.0).unwrap(), 0.99);
        assert_eq!(props.get_usize("Threads", 1).unwrap(), 2);
    }

    #[test]
    fn test_parse_trailing_semicolon_and_spaces() {
        let props = PropertySet::parse("A=1; B = two ;").unwrap();
        assert_eq!(props.get("A"), Some("1"));
        assert_eq!(props.get("B"), Some("two"));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_parse_malformed() {
        let err = PropertySet::parse("TrainerType=PG.ST;oops").unwrap_err();
        assert_eq!(err, PropertyError::Malformed("oops".to_string()));
    }

    #[test]
    fn test_unknown_keys_retained() {
        let props = PropertySet::parse("TrainerType=PG.ST;GameROM=/tmp/pong.bin").unwrap();
        // Unknown to the trainer, but available to the environment.
        assert_eq!(props.get("GameROM"), Some("/tmp/pong.bin"));
    }

    #[test]
    fn test_require_missing() {
        let props = PropertySet::parse("Gamma=0.99").unwrap();
        assert_eq!(
            props.require("TrainerType").unwrap_err(),
            PropertyError::Missing("TrainerType".to_string())
        );
    }

    #[test]
    fn test_get_bool() {
        let props = PropertySet::parse("AllowDiscountReset=True;NormalizeInput=false").unwrap();
        assert!(props.get_bool("AllowDiscountReset", false).unwrap());
        assert!(!props.get_bool("NormalizeInput", true).unwrap());
        assert!(props.get_bool("UseAcceleratedTraining", true).unwrap());
    }

    #[test]
    fn test_property_string_round_trip() {
        let props = PropertySet::parse("B=2;A=1").unwrap();
        let text = props.to_property_string();
        assert_eq!(PropertySet::parse(&text).unwrap(), props);
    }

    #[test]
    fn test_invalid_typed_value() {
        let props = PropertySet::parse("Gamma=fast").unwrap();
        assert!(matches!(
            props.get_f64("Gamma", 0.99),
            Err(PropertyError::Invalid { .. })
        ));
    }
}
