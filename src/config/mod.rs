//! Warmup configuration: tunables, validation and sources.

mod source;
mod warmup_config;

pub use source::{parse_toml, ConfigurationSource, EnvOverrides, StaticSource, TomlFileSource, ENV_PREFIX};
pub use warmup_config::{
    ConfigError, ConflictResolution, OverflowPolicy, SharedConfig, WarmupConfig, MAX_USAGE_WINDOW_SECONDS,
    MAX_WARMUP_TIMEOUT_SECONDS,
};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
