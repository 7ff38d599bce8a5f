//! Allow-listed configuration snapshot attached to error reports
//!
//! Implemented as an allow list rather than a block list, so secrets such as API keys
//! can never leave the process through an error report.

use crate::config::{
    Config, ENV_EXPERIMENTAL_TABLET_DEBUG_VARS, ENV_FETCH_CREDENTIALS, ENV_GIT_BRANCH,
    ENV_GIT_COMMIT,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// The only keys ever forwarded to a notification backend
pub const ALLOWED_KEYS: [&str; 4] = [
    ENV_GIT_BRANCH,
    ENV_GIT_COMMIT,
    ENV_EXPERIMENTAL_TABLET_DEBUG_VARS,
    ENV_FETCH_CREDENTIALS,
];

/// Fixed mapping of allow-listed key to its value at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SanitizedEnvironment(BTreeMap<&'static str, Option<String>>);

impl SanitizedEnvironment {
    /// Capture the allow-listed keys through `lookup`; nothing else is ever queried
    pub fn capture<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self(ALLOWED_KEYS.iter().map(|&key| (key, lookup(key))).collect())
    }

    pub fn from_config(config: &Config) -> Self {
        Self::capture(|key| config.env_value(key))
    }

    /// Capture from an arbitrary variable set, such as a process environment
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::capture(|key| vars.get(key).cloned())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_deref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}
