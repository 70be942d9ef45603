//! Step condition expressions.
//!
//! The condition language is deliberately tiny: `key=value` tests equality
//! against the start context. Anything the parser does not recognize becomes
//! [`Condition::Always`], so steps with free-text or empty expressions still
//! activate.

use once_cell::sync::OnceCell;
use regex::Regex;

use approvalflow_protocols::{Context, context_value_text};

static EQUALS_PATTERN: OnceCell<Regex> = OnceCell::new();

fn equals_pattern() -> Option<&'static Regex> {
    EQUALS_PATTERN
        .get_or_try_init(|| Regex::new(r"(?:^|[\s,(])([A-Za-z_][A-Za-z0-9_.]*)\s*==?\s*([^,\s)]+)"))
        .ok()
}

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `context[key]` must equal `value`.
    Equals { key: String, value: String },
    /// Always holds.
    Always,
}

impl Condition {
    /// Parse an expression.
    ///
    /// The first `key=value` pair wins; the value runs up to the next comma
    /// or whitespace.
    pub fn parse(expression: &str) -> Self {
        let Some(pattern) = equals_pattern() else {
            return Condition::Always;
        };

        match pattern.captures(expression) {
            Some(caps) => Condition::Equals {
                key: caps[1].to_string(),
                value: caps[2].trim_matches(|c| c == '\'' || c == '"').to_string(),
            },
            None => Condition::Always,
        }
    }

    /// Evaluate against a context. A missing key never matches.
    pub fn evaluate(&self, context: &Context) -> bool {
        match self {
            Condition::Always => true,
            Condition::Equals { key, value } => context
                .get(key)
                .is_some_and(|actual| context_value_text(actual) == *value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(pairs: &[(&str, serde_json::Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_equals() {
        assert_eq!(
            Condition::parse("entityType=FRUIT"),
            Condition::Equals {
                key: "entityType".to_string(),
                value: "FRUIT".to_string()
            }
        );
    }

    #[test]
    fn test_parse_stops_at_comma_or_space() {
        assert_eq!(
            Condition::parse("userRole=ADMIN, entityType=FRUIT"),
            Condition::Equals {
                key: "userRole".to_string(),
                value: "ADMIN".to_string()
            }
        );
        assert_eq!(
            Condition::parse("region = EU only"),
            Condition::Equals {
                key: "region".to_string(),
                value: "EU".to_string()
            }
        );
    }

    #[test]
    fn test_parse_double_equals_and_quotes() {
        assert_eq!(
            Condition::parse("entityType == 'SELLER'"),
            Condition::Equals {
                key: "entityType".to_string(),
                value: "SELLER".to_string()
            }
        );
    }

    #[test]
    fn test_unrecognized_is_always() {
        assert_eq!(Condition::parse(""), Condition::Always);
        assert_eq!(Condition::parse("amount > 1000"), Condition::Always);
        assert_eq!(Condition::parse("always"), Condition::Always);
    }

    #[test]
    fn test_evaluate_string_and_number() {
        let ctx = context(&[("entityType", json!("FRUIT")), ("tier", json!(2))]);
        assert!(Condition::parse("entityType=FRUIT").evaluate(&ctx));
        assert!(!Condition::parse("entityType=SELLER").evaluate(&ctx));
        assert!(Condition::parse("tier=2").evaluate(&ctx));
    }

    #[test]
    fn test_missing_key_fails() {
        let ctx = context(&[]);
        assert!(!Condition::parse("userRole=ADMIN").evaluate(&ctx));
        assert!(Condition::Always.evaluate(&ctx));
    }
}
