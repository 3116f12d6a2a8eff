//! Typed feature values attached to annotations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Feature name to value mapping. Merging is last-write-wins.
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// A feature value.
///
/// Typed sequences (`Doubles`, `Ints`, `Strings`) are kept apart from the
/// heterogeneous `List` because map-file values and decoded column values
/// preserve that distinction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FeatureValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Doubles(Vec<f64>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
    List(Vec<FeatureValue>),
    Map(FeatureMap),
}

impl FeatureValue {
    /// Short name of the value's shape, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FeatureValue::Null => "null",
            FeatureValue::Bool(_) => "bool",
            FeatureValue::Int(_) => "int",
            FeatureValue::Float(_) => "float",
            FeatureValue::Text(_) => "text",
            FeatureValue::Bytes(_) => "bytes",
            FeatureValue::Doubles(_) => "doubles",
            FeatureValue::Ints(_) => "ints",
            FeatureValue::Strings(_) => "strings",
            FeatureValue::List(_) => "list",
            FeatureValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FeatureMap> {
        match self {
            FeatureValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

fn write_seq<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

struct Float(f64);

impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug keeps the fractional part: 1.0 rather than 1
        write!(f, "{:?}", self.0)
    }
}

/// The host-default string form of a value.
impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Null => f.write_str("null"),
            FeatureValue::Bool(b) => write!(f, "{}", b),
            FeatureValue::Int(i) => write!(f, "{}", i),
            FeatureValue::Float(x) => write!(f, "{}", Float(*x)),
            FeatureValue::Text(s) => f.write_str(s),
            FeatureValue::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            FeatureValue::Doubles(v) => {
                let items: Vec<Float> = v.iter().copied().map(Float).collect();
                write_seq(f, &items)
            }
            FeatureValue::Ints(v) => write_seq(f, v),
            FeatureValue::Strings(v) => write_seq(f, v),
            FeatureValue::List(v) => write_seq(f, v),
            FeatureValue::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}={}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<serde_json::Value> for FeatureValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FeatureValue::Null,
            Value::Bool(b) => FeatureValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FeatureValue::Int(i),
                None => FeatureValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FeatureValue::Text(s),
            Value::Array(items) => {
                FeatureValue::List(items.into_iter().map(FeatureValue::from).collect())
            }
            Value::Object(obj) => FeatureValue::Map(json_object_to_features(obj)),
        }
    }
}

/// Convert a JSON object into a feature map.
pub fn json_object_to_features(obj: serde_json::Map<String, serde_json::Value>) -> FeatureMap {
    obj.into_iter()
        .map(|(k, v)| (k, FeatureValue::from(v)))
        .collect()
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        FeatureValue::Text(s.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        FeatureValue::Text(s)
    }
}

impl From<i64> for FeatureValue {
    fn from(i: i64) -> Self {
        FeatureValue::Int(i)
    }
}

impl From<f64> for FeatureValue {
    fn from(x: f64) -> Self {
        FeatureValue::Float(x)
    }
}

impl From<bool> for FeatureValue {
    fn from(b: bool) -> Self {
        FeatureValue::Bool(b)
    }
}

impl From<Vec<f64>> for FeatureValue {
    fn from(v: Vec<f64>) -> Self {
        FeatureValue::Doubles(v)
    }
}

impl From<FeatureMap> for FeatureValue {
    fn from(m: FeatureMap) -> Self {
        FeatureValue::Map(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_host_form() {
        assert_eq!(FeatureValue::Float(1.0).to_string(), "1.0");
        assert_eq!(FeatureValue::Int(7).to_string(), "7");
        assert_eq!(
            FeatureValue::Doubles(vec![1.0, 2.5, 3.0]).to_string(),
            "[1.0, 2.5, 3.0]"
        );
        assert_eq!(
            FeatureValue::List(vec!["a".into(), FeatureValue::Int(2)]).to_string(),
            "[a, 2]"
        );
        let mut m = FeatureMap::new();
        m.insert("a".into(), FeatureValue::Int(1));
        m.insert("b".into(), "x".into());
        assert_eq!(FeatureValue::Map(m).to_string(), "{a=1, b=x}");
    }

    #[test]
    fn test_from_json() {
        let value = FeatureValue::from(json!({"n": 1, "x": 2.5, "tags": ["a", null]}));
        let map = value.as_map().unwrap();
        assert_eq!(map["n"], FeatureValue::Int(1));
        assert_eq!(map["x"], FeatureValue::Float(2.5));
        assert_eq!(
            map["tags"],
            FeatureValue::List(vec!["a".into(), FeatureValue::Null])
        );
    }

    #[test]
    fn test_serde_is_tagged() {
        let json = serde_json::to_string(&FeatureValue::Doubles(vec![0.5])).unwrap();
        assert_eq!(json, r#"{"type":"doubles","value":[0.5]}"#);
        let back: FeatureValue = serde_json::from_str(r#"{"type":"null"}"#).unwrap();
        assert!(back.is_null());
    }
}
