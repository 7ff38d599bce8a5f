//! Configuration management
//!
//! Configuration is loaded once at startup from an optional TOML file, overridden by
//! `VTADMIN_*` environment variables and validated. The resulting [`Config`] is shared
//! by reference with the API client and the error reporter.

use crate::error::ConfigError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub const ENV_API_ADDRESS: &str = "VTADMIN_API_ADDRESS";
pub const ENV_API_TOKEN: &str = "VTADMIN_API_TOKEN";
pub const ENV_FETCH_CREDENTIALS: &str = "VTADMIN_FETCH_CREDENTIALS";
pub const ENV_GIT_BRANCH: &str = "VTADMIN_GIT_BRANCH";
pub const ENV_GIT_COMMIT: &str = "VTADMIN_GIT_COMMIT";
pub const ENV_EXPERIMENTAL_TABLET_DEBUG_VARS: &str = "VTADMIN_ENABLE_EXPERIMENTAL_TABLET_DEBUG_VARS";
pub const ENV_BUGSNAG_API_KEY: &str = "VTADMIN_BUGSNAG_API_KEY";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub build: BuildConfig,
    pub features: FeatureConfig,
    pub bugsnag: BugsnagConfig,
}

/// Admin API connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base address every endpoint is appended to
    pub address: String,
    /// Whether the bearer token is attached to requests
    pub fetch_credentials: Option<FetchCredentials>,
    /// Optional bearer token
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:14200".to_string(),
            fetch_credentials: None,
            token: None,
            timeout_seconds: 30,
        }
    }
}

/// Build identifiers attached to error reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub git_branch: Option<String>,
    pub git_commit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub experimental_tablet_debug_vars: bool,
}

/// Bugsnag notifier settings; the backend is enabled only when `api_key` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugsnagConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub release_stage: String,
}

impl Default for BugsnagConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://notify.bugsnag.com".to_string(),
            release_stage: "production".to_string(),
        }
    }
}

/// Credentials mode, mirroring the fetch API modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchCredentials {
    /// Never attach the bearer token
    Omit,
    /// Attach the token only to requests for the API's own origin
    SameOrigin,
    /// Always attach the token
    Include,
}

impl FetchCredentials {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchCredentials::Omit => "omit",
            FetchCredentials::SameOrigin => "same-origin",
            FetchCredentials::Include => "include",
        }
    }
}

impl FromStr for FetchCredentials {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "omit" => Ok(FetchCredentials::Omit),
            "same-origin" => Ok(FetchCredentials::SameOrigin),
            "include" => Ok(FetchCredentials::Include),
            other => Err(ConfigError::ValidationError(format!(
                "Invalid fetch credentials property: {}. Must be undefined or one of omit, same-origin, include",
                other
            ))),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text without applying overrides
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, and a parse or
    /// validation error if its contents are invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Load from an optional file, apply process environment overrides and validate
    ///
    /// A missing or unreadable file falls back to defaults with a warning.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Self::from_file(path) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(reason)) => {
                        warn!("Configuration file unreadable ({}), using defaults", reason);
                        Self::default()
                    }
                    Err(e) => return Err(e),
                }
            }
            None => {
                info!("Using default configuration");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VTADMIN_*` overrides obtained through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ENV_API_ADDRESS) {
            self.api.address = address;
        }
        if let Some(token) = lookup(ENV_API_TOKEN) {
            self.api.token = Some(token);
        }
        if let Some(credentials) = lookup(ENV_FETCH_CREDENTIALS) {
            self.api.fetch_credentials = if credentials.is_empty() {
                None
            } else {
                Some(credentials.parse()?)
            };
        }
        if let Some(branch) = lookup(ENV_GIT_BRANCH) {
            self.build.git_branch = Some(branch);
        }
        if let Some(commit) = lookup(ENV_GIT_COMMIT) {
            self.build.git_commit = Some(commit);
        }
        if let Some(flag) = lookup(ENV_EXPERIMENTAL_TABLET_DEBUG_VARS) {
            self.features.experimental_tablet_debug_vars = parse_flag(&flag);
        }
        if let Some(key) = lookup(ENV_BUGSNAG_API_KEY) {
            self.bugsnag.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api.address must not be empty".to_string(),
            ));
        }
        if self.api.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "api.timeout_seconds must be greater than zero".to_string(),
            ));
        }
        if self.bugsnag.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "bugsnag.endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Current value of an environment-style key as it would be exported to the process
    ///
    /// Only the keys this configuration knows about resolve; everything else is `None`.
    pub fn env_value(&self, key: &str) -> Option<String> {
        match key {
            ENV_API_ADDRESS => Some(self.api.address.clone()),
            ENV_API_TOKEN => self.api.token.clone(),
            ENV_FETCH_CREDENTIALS => self.api.fetch_credentials.map(|c| c.as_str().to_string()),
            ENV_GIT_BRANCH => self.build.git_branch.clone(),
            ENV_GIT_COMMIT => self.build.git_commit.clone(),
            ENV_EXPERIMENTAL_TABLET_DEBUG_VARS => self
                .features
                .experimental_tablet_debug_vars
                .then(|| "true".to_string()),
            ENV_BUGSNAG_API_KEY => self.bugsnag.api_key.clone(),
            _ => None,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
