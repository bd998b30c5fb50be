//! Core types for modelgate

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single tabular row of named features, in payload order
pub type FeatureRow = serde_json::Map<String, serde_json::Value>;

/// A predicted label or value
///
/// Serialized untagged, so an integer class renders as a bare JSON integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    /// Integer class label
    Int(i64),
    /// Regression output or float class label
    Float(f64),
    /// String class label
    Text(String),
}

impl Label {
    /// Numeric view of the label, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl From<i64> for Label {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Label {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Label {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_serializes_untagged() {
        assert_eq!(serde_json::to_string(&Label::Int(2)).unwrap(), "2");
        assert_eq!(serde_json::to_string(&Label::Float(0.5)).unwrap(), "0.5");
        assert_eq!(serde_json::to_string(&Label::from("setosa")).unwrap(), "\"setosa\"");
    }

    #[test]
    fn test_label_deserializes_narrowest_variant() {
        assert_eq!(serde_json::from_str::<Label>("1").unwrap(), Label::Int(1));
        assert_eq!(serde_json::from_str::<Label>("1.5").unwrap(), Label::Float(1.5));
        assert_eq!(serde_json::from_str::<Label>("\"a\"").unwrap(), Label::from("a"));
    }

    #[test]
    fn test_feature_row_preserves_payload_order() {
        let row: FeatureRow =
            serde_json::from_str(r#"{"sepal length (cm)": 5.1, "petal width (cm)": 0.2}"#).unwrap();
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["sepal length (cm)", "petal width (cm)"]);
        assert_eq!(row["petal width (cm)"].as_f64(), Some(0.2));
    }
}
