//! Loosely-typed record as yielded by a source adapter.
//!
//! Adapters flatten whatever their wire format produced into a string-keyed
//! JSON map. Only normalizers interpret the keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Wrap a JSON value; non-objects yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert, skipping `None`.
    pub fn with(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(v) = value {
            self.0.insert(key.to_string(), v.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Trimmed, non-empty string. Numbers are stringified.
    pub fn str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "si" | "sí" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn array(&self, key: &str) -> &[Value] {
        match self.0.get(key) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key)?.as_object()
    }

    /// Collect a string field from each object in an array (e.g. `descripcion`).
    pub fn labels(&self, key: &str, field: &str) -> Vec<String> {
        self.array(key)
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => o.get(field).and_then(Value::as_str).map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RawRecord {
        RawRecord::from_value(json!({
            "codigo": "  123  ",
            "numero": 42,
            "blank": "   ",
            "abierto": "true",
            "importe": "1500.5",
            "sectores": [{"descripcion": "Cultura"}, {"descripcion": " "}, "Deporte"]
        }))
        .unwrap()
    }

    #[test]
    fn strings_are_trimmed_and_blank_is_none() {
        let r = record();
        assert_eq!(r.str("codigo").as_deref(), Some("123"));
        assert_eq!(r.str("numero").as_deref(), Some("42"));
        assert_eq!(r.str("blank"), None);
        assert_eq!(r.str("missing"), None);
    }

    #[test]
    fn typed_accessors_coerce_strings() {
        let r = record();
        assert_eq!(r.bool("abierto"), Some(true));
        assert_eq!(r.f64("importe"), Some(1500.5));
    }

    #[test]
    fn labels_skip_blank_entries() {
        assert_eq!(record().labels("sectores", "descripcion"), vec!["Cultura", "Deporte"]);
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(RawRecord::from_value(json!([1, 2])).is_none());
    }
}
