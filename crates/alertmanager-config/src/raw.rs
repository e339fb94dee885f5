//! The untyped Alertmanager configuration tree.
//!
//! Alertmanager accepts a large and evolving configuration grammar, so the operator never
//! models it as a fixed set of Rust structs. Instead the tree is kept as a JSON-compatible
//! mapping (keys are always strings in Alertmanager's grammar). [`serde_json::Map`] is
//! ordered by key, which makes every rendering of the same tree byte-identical.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse config as YAML"))]
    ParseYaml { source: serde_yaml::Error },

    #[snafu(display("failed to parse config as JSON"))]
    ParseJson { source: serde_json::Error },

    #[snafu(display("config must be a mapping at the top level, found {found}"))]
    NotAMapping { found: &'static str },
}

/// A structured Alertmanager configuration document.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawConfig(Map<String, Value>);

impl RawConfig {
    /// The compiled-in fallback used when neither the operator nor a remote provider
    /// supplies a configuration.
    pub fn default_config() -> Self {
        Self::from_value(json!({
            "global": {
                "http_config": {
                    "tls_config": {
                        "insecure_skip_verify": false
                    }
                }
            },
            "route": {
                "group_wait": "30s",
                "group_interval": "5m",
                "repeat_interval": "1h",
                "receiver": "placeholder"
            },
            "receivers": [
                {"name": "placeholder"}
            ]
        }))
        .unwrap_or_default()
    }

    /// Parses a YAML document. A blank document yields an empty config.
    pub fn from_yaml(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let value: Value = serde_yaml::from_str(input).context(ParseYamlSnafu)?;
        Self::from_value(value)
    }

    /// Parses a JSON document, as exchanged over the remote configuration relation.
    pub fn from_json(input: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(input).context(ParseJsonSnafu)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self(map)),
            other => NotAMappingSnafu {
                found: type_name(&other),
            }
            .fail(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serializes the config as compact JSON (the relation wire format).
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Returns `true` if the config declares a non-empty `templates` section.
    ///
    /// Alertmanager writes an empty `templates: []` placeholder back into configs it has
    /// loaded, so an empty list (or `null`) does not count.
    pub fn has_inline_templates(&self) -> bool {
        match self.0.get("templates") {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        }
    }
}

impl From<Map<String, Value>> for RawConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Human readable name of a JSON value kind, used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
