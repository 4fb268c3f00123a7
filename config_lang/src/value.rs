use std::collections::BTreeMap;

/// A parsed config node. Mirrors this crate's predecessor's `YamlValue` but owns its
/// strings instead of borrowing, since config files are small and parsed
/// once at startup (`src/config_handler/types.rs` used the borrowed form
/// only to avoid a handful of allocations that don't matter here).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
    Scalar(String),
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s.as_str()),
            _ => None,
        }
    }
}
