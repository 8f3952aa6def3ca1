//! Hyperparameter values and the ordered assignment handed to a trial.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A concrete parameter value assigned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Wire shape of a single assignment: `{"value": <scalar>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub value: ParameterValue,
}

/// Ordered mapping of parameter name to assignment.
///
/// Order is the order the coordinator sent the parameters in and is kept
/// through serialization, so config files list parameters the same way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HyperParams {
    entries: Vec<(String, ParamEntry)>,
}

impl HyperParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, replacing an existing value in place.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParameterValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParameterValue>) {
        let name = name.into();
        let entry = ParamEntry {
            value: value.into(),
        };
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((name, entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, entry)| &entry.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for HyperParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HyperParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = HyperParams;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of parameter name to {value}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut params = HyperParams::new();
                while let Some((name, entry)) = access.next_entry::<String, ParamEntry>()? {
                    params.insert(name, entry.value);
                }
                Ok(params)
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(HyperParams::new())
            }
        }

        deserializer.deserialize_any(OrderedVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_keeps_coordinator_order() {
        let json = r#"{"lr": {"value": 0.01}, "batch_size": {"value": 64}, "act": {"value": "relu"}}"#;
        let params: HyperParams = serde_json::from_str(json).unwrap();

        let names: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["lr", "batch_size", "act"]);
        assert_eq!(params.get("lr"), Some(&ParameterValue::Float(0.01)));
        assert_eq!(params.get("batch_size"), Some(&ParameterValue::Int(64)));
        assert_eq!(params.get("act"), Some(&ParameterValue::Text("relu".into())));
    }

    #[test]
    fn insert_replaces_existing_in_place() {
        let mut params = HyperParams::new().with("a", 1).with("b", 2);
        params.insert("a", 3);

        let pairs: Vec<(&str, String)> = params.iter().map(|(k, v)| (k, v.to_string())).collect();
        assert_eq!(pairs, vec![("a", "3".to_string()), ("b", "2".to_string())]);
    }

    #[test]
    fn entries_without_value_are_rejected() {
        let json = r#"{"lr": 0.01}"#;
        assert!(serde_json::from_str::<HyperParams>(json).is_err());
    }

    #[test]
    fn null_args_deserialize_empty() {
        let params: HyperParams = serde_json::from_str("null").unwrap();
        assert!(params.is_empty());
    }

    #[test]
    fn nested_values_fall_back_to_json() {
        let json = r#"{"layers": {"value": [64, 32]}}"#;
        let params: HyperParams = serde_json::from_str(json).unwrap();
        assert_eq!(
            params.get("layers"),
            Some(&ParameterValue::Json(serde_json::json!([64, 32])))
        );
        assert_eq!(params.get("layers").unwrap().to_string(), "[64,32]");
    }
}
