//! Null value handling for loaded cells

use dx_core::Value;
use serde::{Deserialize, Serialize};

/// Null value configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NullConfig {
    /// Patterns to treat as null
    pub patterns: Vec<String>,

    /// Whether to trim whitespace before checking
    pub trim_whitespace: bool,

    /// Case sensitive matching
    pub case_sensitive: bool,
}

impl Default for NullConfig {
    fn default() -> Self {
        Self {
            patterns: vec![
                String::new(),
                "-".to_string(),
                "N/A".to_string(),
                "NA".to_string(),
                "null".to_string(),
                "None".to_string(),
                "NaN".to_string(),
            ],
            trim_whitespace: true,
            case_sensitive: false,
        }
    }
}

impl NullConfig {
    /// Check if raw text should be treated as null
    pub fn is_null_text(&self, value: &str) -> bool {
        let test_value = if self.trim_whitespace {
            value.trim()
        } else {
            value
        };

        self.patterns.iter().any(|pattern| {
            if self.case_sensitive {
                test_value == pattern
            } else {
                test_value.eq_ignore_ascii_case(pattern)
            }
        })
    }

    /// Check if a cell carries no usable value
    pub fn is_null(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Text(text) => self.is_null_text(text),
            Value::Number(n) => !n.is_finite(),
            Value::Date(_) => false,
        }
    }

    /// Convert a raw text cell into a value: null, number, or text
    pub fn parse_cell(&self, raw: &str) -> Value {
        if self.is_null_text(raw) {
            Value::Null
        } else if let Some(n) = dx_core::value::parse_number(raw) {
            Value::Number(n)
        } else {
            Value::Text(raw.to_string())
        }
    }

    /// Add a null pattern
    pub fn add_pattern(&mut self, pattern: String) {
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns() {
        let config = NullConfig::default();
        assert!(config.is_null_text(""));
        assert!(config.is_null_text("  n/a "));
        assert!(config.is_null_text("NULL"));
        assert!(!config.is_null_text("0"));
        assert!(config.is_null(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_parse_cell() {
        let config = NullConfig::default();
        assert_eq!(config.parse_cell("42"), Value::Number(42.0));
        assert_eq!(config.parse_cell(" 1.5 "), Value::Number(1.5));
        assert_eq!(config.parse_cell("-"), Value::Null);
        assert_eq!(config.parse_cell("2023-01-01"), Value::Text("2023-01-01".into()));
    }

    #[test]
    fn test_case_sensitive_patterns() {
        let mut config = NullConfig {
            case_sensitive: true,
            ..NullConfig::default()
        };
        config.add_pattern("MISSING".into());
        assert!(config.is_null_text("MISSING"));
        assert!(!config.is_null_text("missing"));
    }
}
