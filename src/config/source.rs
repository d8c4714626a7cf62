//! Configuration sources: static values, TOML files and environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::warmup_config::{ConfigError, WarmupConfig};

/// Prefix for environment overrides, e.g. `GG_WARMUP_MAX_MEMORY_MB=4096`.
pub const ENV_PREFIX: &str = "GG_WARMUP_";

/// Supplies a `WarmupConfig` at start-up and on hot reload.
pub trait ConfigurationSource: Send + Sync {
    fn load(&self) -> Result<WarmupConfig, ConfigError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Fixed in-memory configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticSource(pub WarmupConfig);

impl ConfigurationSource for StaticSource {
    fn load(&self) -> Result<WarmupConfig, ConfigError> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

/// TOML file; missing keys take their defaults.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl ConfigurationSource for TomlFileSource {
    fn load(&self) -> Result<WarmupConfig, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        parse_toml(&text)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

pub fn parse_toml(text: &str) -> Result<WarmupConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Layers `GG_WARMUP_*` variables over another source.
pub struct EnvOverrides<S> {
    inner: S,
    vars: Option<HashMap<String, String>>,
}

impl<S: ConfigurationSource> EnvOverrides<S> {
    /// Reads the process environment on every `load`.
    pub fn new(inner: S) -> Self {
        Self { inner, vars: None }
    }

    /// Uses a fixed variable set instead of the process environment.
    pub fn with_vars<I, K, V>(inner: S, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { inner, vars: Some(vars) }
    }

    fn overrides(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = match &self.vars {
            Some(vars) => vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => std::env::vars().collect(),
        };
        pairs.retain(|(k, _)| k.starts_with(ENV_PREFIX));
        pairs.sort();
        pairs
    }
}

impl<S: ConfigurationSource> ConfigurationSource for EnvOverrides<S> {
    fn load(&self) -> Result<WarmupConfig, ConfigError> {
        let base = self.inner.load()?;
        let overrides = self.overrides();
        if overrides.is_empty() {
            return Ok(base);
        }

        let mut value = toml::Value::try_from(&base).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let table = value
            .as_table_mut()
            .ok_or_else(|| ConfigError::Parse("configuration is not a table".to_string()))?;

        for (key, raw) in overrides {
            let field = key[ENV_PREFIX.len()..].to_ascii_lowercase();
            if !table.contains_key(&field) {
                return Err(ConfigError::UnknownKey(key));
            }
            tracing::debug!(field = %field, "Applying environment override");
            table.insert(field, parse_scalar(&raw));
        }

        value.try_into().map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("env+{}", self.inner.describe())
    }
}

fn parse_scalar(raw: &str) -> toml::Value {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return toml::Value::Integer(v);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return toml::Value::Float(v);
    }
    if let Ok(v) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(v);
    }
    toml::Value::String(trimmed.to_string())
}
