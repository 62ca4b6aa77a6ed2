//! Configuration for test runs.
//!
//! [`HarnessConfig`] controls how a [`Runner`](crate::unittest::Runner)
//! drives a suite:
//! - How often the serial visitor yields through the scheduler
//! - Whether leaked scheduled calls fail a test
//! - How many idle pump rounds `run_to_completion` tolerates
//!
//! # Builder Style
//!
//! `HarnessConfig` uses a fluent, move-based builder style:
//!
//! ```
//! use deferlab::config::HarnessConfig;
//!
//! let config = HarnessConfig::new().yield_every(16).stall_limit(10);
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Layered Loading
//!
//! [`ConfigLoader`] applies, lowest precedence first: defaults, a TOML file
//! (with the `config-file` feature), `DEFERLAB_*` environment variables, and
//! programmatic overrides.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default number of suite children between scheduler yields.
pub const DEFAULT_YIELD_EVERY: usize = 64;

/// Default number of rounds without progress before a run is declared stalled.
pub const DEFAULT_STALL_LIMIT: usize = 1024;

const ENV_PREFIX: &str = "DEFERLAB_";

/// Configuration for a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// The serial visitor yields through the scheduler after this many
    /// children (and at the end of every list). Must be at least 1.
    pub yield_every: usize,
    /// Whether a test that leaves scheduled calls behind is an error.
    pub detect_leaks: bool,
    /// Consecutive scheduler rounds in which no test starts or finishes after
    /// which `run_to_completion` gives up. Calls that keep firing, such as a
    /// leaked interval, do not count as progress.
    pub stall_limit: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            yield_every: DEFAULT_YIELD_EVERY,
            detect_leaks: true,
            stall_limit: DEFAULT_STALL_LIMIT,
        }
    }
}

impl HarnessConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many suite children run between scheduler yields.
    #[must_use]
    pub fn yield_every(mut self, children: usize) -> Self {
        self.yield_every = children;
        self
    }

    /// Enables or disables leak detection.
    #[must_use]
    pub fn detect_leaks(mut self, enabled: bool) -> Self {
        self.detect_leaks = enabled;
        self
    }

    /// Sets the stalled-round limit for `run_to_completion`.
    #[must_use]
    pub fn stall_limit(mut self, rounds: usize) -> Self {
        self.stall_limit = rounds;
        self
    }

    /// Checks that every field is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.yield_every == 0 {
            return Err(ConfigError::InvalidYieldEvery);
        }
        if self.stall_limit == 0 {
            return Err(ConfigError::InvalidStallLimit);
        }
        Ok(())
    }
}

/// Configuration loader with layered sources.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    base: HarnessConfig,
    file_path: Option<PathBuf>,
    overrides: BTreeMap<String, String>,
}

impl ConfigLoader {
    /// Creates a loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from `config` instead of the defaults.
    #[must_use]
    pub fn base(mut self, config: HarnessConfig) -> Self {
        self.base = config;
        self
    }

    /// Sets a TOML file to load (requires the `config-file` feature).
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Adds a programmatic override (highest precedence), keyed like the
    /// environment variables, e.g. `DEFERLAB_YIELD_EVERY`.
    #[must_use]
    pub fn override_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Loads configuration with precedence:
    /// 1. Base (defaults unless [`base`](Self::base) was called)
    /// 2. File config
    /// 3. Environment variables
    /// 4. Programmatic overrides (highest)
    pub fn load(&self) -> Result<HarnessConfig, ConfigError> {
        self.load_with_env(std::env::vars())
    }

    /// Like [`load`](Self::load), reading environment variables from `vars`.
    pub fn load_with_env<I>(&self, vars: I) -> Result<HarnessConfig, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = match &self.file_path {
            Some(path) => load_from_file(path, self.base.clone())?,
            None => self.base.clone(),
        };

        let env: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        apply_overrides(&mut config, &env)?;
        apply_overrides(&mut config, &self.overrides)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "config-file")]
fn load_from_file(path: &std::path::Path, base: HarnessConfig) -> Result<HarnessConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, base)
}

#[cfg(not(feature = "config-file"))]
fn load_from_file(path: &std::path::Path, _base: HarnessConfig) -> Result<HarnessConfig, ConfigError> {
    Err(ConfigError::Parse(format!(
        "{} given but the config-file feature is disabled",
        path.display()
    )))
}

/// Fields a file may set; anything missing keeps the base value.
#[cfg(feature = "config-file")]
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    yield_every: Option<usize>,
    detect_leaks: Option<bool>,
    stall_limit: Option<usize>,
}

#[cfg(feature = "config-file")]
fn parse_config(contents: &str, base: HarnessConfig) -> Result<HarnessConfig, ConfigError> {
    let file: FileConfig =
        toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
    let mut config = base;
    if let Some(value) = file.yield_every {
        config.yield_every = value;
    }
    if let Some(value) = file.detect_leaks {
        config.detect_leaks = value;
    }
    if let Some(value) = file.stall_limit {
        config.stall_limit = value;
    }
    Ok(config)
}

fn apply_overrides(
    config: &mut HarnessConfig,
    overrides: &BTreeMap<String, String>,
) -> Result<(), ConfigError> {
    for (key, value) in overrides {
        apply_override(config, key, value)?;
    }
    Ok(())
}

fn apply_override(config: &mut HarnessConfig, key: &str, value: &str) -> Result<(), ConfigError> {
    match key {
        "DEFERLAB_YIELD_EVERY" => config.yield_every = parse_usize(value, key)?,
        "DEFERLAB_DETECT_LEAKS" => config.detect_leaks = parse_bool(value, key)?,
        "DEFERLAB_STALL_LIMIT" => config.stall_limit = parse_usize(value, key)?,
        _ => return Err(ConfigError::InvalidOverride(key.to_string())),
    }
    Ok(())
}

fn parse_usize(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::Parse(format!("invalid usize for {key}: {value}")))
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse(format!("invalid bool for {key}: {value}"))),
    }
}
