//! Read-only settings sources consulted by the resolver.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::Path;

/// A read-only key/value view of settings. Blank values are treated as absent.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

fn non_blank(v: &str) -> Option<String> {
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// Snapshot of the process environment taken at construction. Later changes to the environment
/// are not observed.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).and_then(|v| non_blank(v))
    }
}

/// Fixed key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    vars: HashMap<String, String>,
}

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for MapSource
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConfigSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).and_then(|v| non_blank(v))
    }
}

/// Settings file in TOML. `[openai] api_key = "..."` answers `OPENAI_API_KEY`; top-level
/// `default_provider = "..."` answers `DEFAULT_PROVIDER`. Deeper nesting is ignored.
#[derive(Debug, Clone, Default)]
pub struct TomlSource {
    vars: HashMap<String, String>,
}

impl TomlSource {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Source {
            path: path.display().to_string(),
            message: format!("read failed: {e}"),
        })?;
        Self::parse(&contents, &path.display().to_string())
    }

    /// Parses `contents`; `origin` names the file in error messages.
    pub fn parse(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = contents.parse().map_err(|e| ConfigError::Source {
            path: origin.to_string(),
            message: format!("parse failed: {e}"),
        })?;

        let mut vars = HashMap::new();
        for (key, value) in &table {
            match value {
                toml::Value::Table(section) => {
                    for (inner, v) in section {
                        if let Some(s) = scalar_to_string(v) {
                            vars.insert(
                                format!("{}_{}", key.to_ascii_uppercase(), inner.to_ascii_uppercase()),
                                s,
                            );
                        }
                    }
                }
                other => {
                    if let Some(s) = scalar_to_string(other) {
                        vars.insert(key.to_ascii_uppercase(), s);
                    }
                }
            }
        }
        Ok(Self { vars })
    }
}

fn scalar_to_string(v: &toml::Value) -> Option<String> {
    match v {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

impl ConfigSource for TomlSource {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).and_then(|v| non_blank(v))
    }
}

/// Ordered sources; the first non-blank answer wins.
#[derive(Default)]
pub struct Layered {
    layers: Vec<Box<dyn ConfigSource>>,
}

impl Layered {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer with lower priority than every layer added before it.
    pub fn then(mut self, source: impl ConfigSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }
}

impl ConfigSource for Layered {
    fn get(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|l| l.get(key))
    }
}
