//! Loosely-typed configuration values and the merge rule used to build
//! model config variants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A keyed configuration document (e.g. a model config).
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Leaf value in a configuration document.
///
/// Equality is structural identity: floats compare by bit pattern, so a NaN
/// equals itself and `0.0` differs from `-0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

/// A configuration value: scalar, ordered sequence or nested mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Scalar(Scalar),
    Sequence(Vec<ConfigValue>),
    Mapping(ConfigMap),
}

impl ConfigValue {
    pub fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    /// An empty mapping; applying it to a key enables that section with
    /// server defaults (e.g. `dynamic_batching: {}`).
    pub fn empty_mapping() -> Self {
        Self::Mapping(ConfigMap::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    pub fn as_mapping(&self) -> Option<&ConfigMap> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Scalar(Scalar::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Scalar(Scalar::Null) => serde_json::Value::Null,
            Self::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            Self::Scalar(Scalar::Int(i)) => serde_json::Value::from(*i),
            Self::Scalar(Scalar::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Scalar(Scalar::String(s)) => serde_json::Value::String(s.clone()),
            Self::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(ConfigValue::to_json).collect())
            }
            Self::Mapping(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<serde_json::Value> for ConfigValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::null(),
            serde_json::Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Scalar(Scalar::Int(i)),
                None => Self::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            serde_json::Value::String(s) => Self::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(ConfigValue::from).collect())
            }
            serde_json::Value::Object(map) => Self::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, ConfigValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Scalar(Scalar::Bool(v))
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Scalar(Scalar::Int(v))
    }
}

impl From<u32> for ConfigValue {
    fn from(v: u32) -> Self {
        Self::Scalar(Scalar::Int(i64::from(v)))
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Scalar(Scalar::Float(v))
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Scalar(Scalar::String(v.to_string()))
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Scalar(Scalar::String(v))
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(v: Vec<ConfigValue>) -> Self {
        Self::Sequence(v)
    }
}

impl From<ConfigMap> for ConfigValue {
    fn from(v: ConfigMap) -> Self {
        Self::Mapping(v)
    }
}

/// Set of key/value overrides applied on top of a base config.
///
/// The empty combination means "no change from base" and always names the
/// default variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterCombination(ConfigMap);

impl ParameterCombination {
    pub fn new() -> Self {
        Self(ConfigMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    /// The same combination with `key` removed.
    pub fn without(&self, key: &str) -> Self {
        let mut map = self.0.clone();
        map.remove(key);
        Self(map)
    }
}

impl From<ConfigMap> for ParameterCombination {
    fn from(map: ConfigMap) -> Self {
        Self(map)
    }
}

/// Apply `value` at `key` in `target`.
///
/// When both the existing value and `value` are mappings only the provided
/// subkeys are overwritten, recursively. Anything else is a plain replace.
pub fn apply_value_to_map(key: &str, value: &ConfigValue, target: &mut ConfigMap) {
    if let (Some(ConfigValue::Mapping(existing)), ConfigValue::Mapping(incoming)) =
        (target.get_mut(key), value)
    {
        for (subkey, subvalue) in incoming {
            apply_value_to_map(subkey, subvalue, existing);
        }
        return;
    }
    target.insert(key.to_string(), value.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        match ConfigValue::from(value) {
            ConfigValue::Mapping(m) => m,
            other => panic!("expected mapping, got {other:?}"),
        }
    }

    #[test]
    fn deep_merge_preserves_siblings() {
        let mut target = map(json!({"a": {"b": 0, "c": 2}}));
        apply_value_to_map("a", &ConfigValue::from(json!({"b": 1})), &mut target);
        assert_eq!(target, map(json!({"a": {"b": 1, "c": 2}})));
    }

    #[test]
    fn scalar_replaces_mapping() {
        let mut target = map(json!({"a": {"b": 0}}));
        apply_value_to_map("a", &ConfigValue::from(5i64), &mut target);
        assert_eq!(target, map(json!({"a": 5})));
    }

    #[test]
    fn mapping_replaces_scalar() {
        let mut target = map(json!({"a": 5, "z": true}));
        apply_value_to_map("a", &ConfigValue::from(json!({"b": 1})), &mut target);
        assert_eq!(target, map(json!({"a": {"b": 1}, "z": true})));
    }

    #[test]
    fn nested_merge_recurses_several_levels() {
        let mut target = map(json!({
            "dynamic_batching": {"queue": {"timeout": 10, "size": 4}, "delay": 100}
        }));
        apply_value_to_map(
            "dynamic_batching",
            &ConfigValue::from(json!({"queue": {"size": 8}})),
            &mut target,
        );
        assert_eq!(
            target,
            map(json!({
                "dynamic_batching": {"queue": {"timeout": 10, "size": 8}, "delay": 100}
            }))
        );
    }

    #[test]
    fn sequences_are_replaced_not_merged() {
        let mut target = map(json!({"instance_group": [{"count": 1}, {"count": 2}]}));
        apply_value_to_map(
            "instance_group",
            &ConfigValue::from(json!([{"count": 4}])),
            &mut target,
        );
        assert_eq!(target, map(json!({"instance_group": [{"count": 4}]})));
    }

    #[test]
    fn missing_key_is_inserted() {
        let mut target = ConfigMap::new();
        apply_value_to_map("dynamic_batching", &ConfigValue::empty_mapping(), &mut target);
        assert_eq!(target, map(json!({"dynamic_batching": {}})));
    }

    #[test]
    fn json_conversion_keeps_integer_and_float_apart() {
        assert_eq!(ConfigValue::from(json!(4)), ConfigValue::from(4i64));
        assert_eq!(ConfigValue::from(json!(0.5)), ConfigValue::from(0.5));
        assert_eq!(ConfigValue::from(json!({"x": [1, "a"]})).to_json(), json!({"x": [1, "a"]}));
    }

    #[test]
    fn combination_deserializes_from_json_object() {
        let combo: ParameterCombination =
            serde_json::from_value(json!({"max_batch_size": 8, "dynamic_batching": {}})).unwrap();
        assert_eq!(combo.get("max_batch_size"), Some(&ConfigValue::from(8i64)));
        assert_eq!(combo.get("dynamic_batching"), Some(&ConfigValue::empty_mapping()));
        assert!(!combo.is_default());
        assert!(ParameterCombination::new().is_default());
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(ConfigValue::from(f64::NAN), ConfigValue::from(f64::NAN));
        assert_ne!(ConfigValue::from(0.0), ConfigValue::from(-0.0));
        assert_ne!(ConfigValue::from(1.0), ConfigValue::from(1i64));
        let combo = ParameterCombination::new().with("delay", f64::NAN);
        assert_eq!(combo, combo.clone());
    }
}
