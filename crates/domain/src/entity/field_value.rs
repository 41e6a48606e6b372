//! Typed field values stored on contacts and deals.
//!
//! The coercion helpers here are the single source of truth for how values
//! compare. Condition evaluation and action application both go through
//! them, so a value written by an action reads back the same way in a later
//! condition.

use serde::{Deserialize, Serialize};

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Numeric view of the value.
    ///
    /// Numbers and trimmed numeric text coerce; everything else does not.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) if n.is_finite() => Some(*n),
            Self::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// `true` for null, blank text and empty lists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(text) => text.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Bool(_) | Self::Number(_) => false,
        }
    }

    /// Equality with cross-type coercion.
    ///
    /// Numbers compare numerically against numbers and numeric text, booleans
    /// against `"true"`/`"false"` text. Text compares exactly against text.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Number(_) | Self::Text(_), Self::Number(_))
            | (Self::Number(_), Self::Text(_)) => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => numbers_equal(a, b),
                _ => false,
            },
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Bool(b), Self::Text(text)) | (Self::Text(text), Self::Bool(b)) => {
                parse_bool(text) == Some(*b)
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }

    /// Case-insensitive containment.
    ///
    /// Substring match on text, membership on lists. Returns `None` when the
    /// value is not a string or list, so the caller decides what that means.
    #[must_use]
    pub fn contains(&self, needle: &Self) -> Option<bool> {
        let needle = needle.to_string().to_lowercase();
        match self {
            Self::Text(text) => Some(text.to_lowercase().contains(&needle)),
            Self::List(items) => Some(items.iter().any(|item| item.to_lowercase() == needle)),
            _ => None,
        }
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(text) => f.write_str(text),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_text_variant_as_plain_string() {
        let val = FieldValue::from("hello");
        let json = serde_json::to_string(&val).unwrap();
        assert_eq!(json, "\"hello\"");
    }

    #[test]
    fn should_deserialize_json_shapes_into_matching_variants() {
        let val: FieldValue = serde_json::from_str("null").unwrap();
        assert_eq!(val, FieldValue::Null);
        let val: FieldValue = serde_json::from_str("42").unwrap();
        assert_eq!(val, FieldValue::Number(42.0));
        let val: FieldValue = serde_json::from_str("true").unwrap();
        assert_eq!(val, FieldValue::Bool(true));
        let val: FieldValue = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(val, FieldValue::List(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn should_coerce_numeric_text_to_number() {
        assert_eq!(FieldValue::from(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(FieldValue::from("twelve").as_number(), None);
        assert_eq!(FieldValue::Bool(true).as_number(), None);
        assert_eq!(FieldValue::Null.as_number(), None);
    }

    #[test]
    fn should_compare_number_with_numeric_text() {
        assert!(FieldValue::Number(100.0).loosely_equals(&FieldValue::from("100")));
        assert!(FieldValue::from("100").loosely_equals(&FieldValue::Number(100.0)));
        assert!(!FieldValue::Number(100.0).loosely_equals(&FieldValue::from("abc")));
    }

    #[test]
    fn should_compare_text_exactly() {
        assert!(FieldValue::from("CA").loosely_equals(&FieldValue::from("CA")));
        assert!(!FieldValue::from("CA").loosely_equals(&FieldValue::from("ca")));
        assert!(!FieldValue::from("00123").loosely_equals(&FieldValue::from("123")));
    }

    #[test]
    fn should_compare_bool_with_bool_text() {
        assert!(FieldValue::Bool(true).loosely_equals(&FieldValue::from("TRUE")));
        assert!(!FieldValue::Bool(false).loosely_equals(&FieldValue::from("true")));
    }

    #[test]
    fn should_report_emptiness() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::from("   ").is_empty());
        assert!(FieldValue::List(vec![]).is_empty());
        assert!(!FieldValue::Number(0.0).is_empty());
        assert!(!FieldValue::Bool(false).is_empty());
    }

    #[test]
    fn should_match_substring_and_list_membership_case_insensitively() {
        let text = FieldValue::from("Acme Corporation");
        assert_eq!(text.contains(&FieldValue::from("acme")), Some(true));
        assert_eq!(text.contains(&FieldValue::from("globex")), Some(false));

        let list = FieldValue::List(vec!["VIP".into(), "lead".into()]);
        assert_eq!(list.contains(&FieldValue::from("vip")), Some(true));
        assert_eq!(list.contains(&FieldValue::from("vi")), Some(false));

        assert_eq!(FieldValue::Number(3.0).contains(&FieldValue::from("3")), None);
    }
}
