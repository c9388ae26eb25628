use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([\w.\-]+)\}\}").expect("env reference pattern"));

/// Substitute `{{name}}` references against `env`. Unresolved references are
/// left untouched so the workload sees exactly what the user wrote.
pub fn replace_env(value: &str, env: &HashMap<String, String>) -> String {
    ENV_REFERENCE
        .replace_all(value, |caps: &Captures| {
            env.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Apply [`replace_env`] to every value of `map`.
pub fn resolve_map(
    map: &HashMap<String, String>,
    env: &HashMap<String, String>,
) -> HashMap<String, String> {
    map.iter()
        .map(|(name, value)| (name.clone(), replace_env(value, env)))
        .collect()
}

/// Named environments available to scan runs. Read-only for the duration of a
/// run; secrets shadow the default environment on name collisions.
#[derive(Debug, Default, Deserialize)]
pub struct EnvStore {
    #[serde(default, rename = "default")]
    default_env: HashMap<String, String>,
    #[serde(default)]
    secrets: HashMap<String, String>,
}

impl EnvStore {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read environment file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse environment file {}", path.display()))
    }

    /// Load from the file named by `SCAN_ENV_FILE`, or empty when unset.
    pub fn from_env_file() -> Result<Self> {
        match std::env::var("SCAN_ENV_FILE") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn with_values(values: HashMap<String, String>) -> Self {
        Self {
            default_env: values,
            secrets: HashMap::new(),
        }
    }

    pub fn resolve_all(&self) -> HashMap<String, String> {
        let mut merged = self.default_env.clone();
        merged.extend(self.secrets.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn references_are_substituted_literally() {
        let store = env(&[("host", "api.example.com"), ("token", "s3cret")]);
        assert_eq!(
            replace_env("https://{{host}}/scan?t={{token}}", &store),
            "https://api.example.com/scan?t=s3cret"
        );
    }

    #[test]
    fn unresolved_references_are_left_untouched() {
        let store = env(&[("host", "api.example.com")]);
        assert_eq!(
            replace_env("{{host}}:{{port}}", &store),
            "api.example.com:{{port}}"
        );
    }

    #[test]
    fn resolve_map_applies_to_every_value() {
        let store = env(&[("user", "alice")]);
        let input = env(&[("USERNAME", "{{user}}"), ("STATIC", "1")]);
        let resolved = resolve_map(&input, &store);
        assert_eq!(resolved["USERNAME"], "alice");
        assert_eq!(resolved["STATIC"], "1");
    }

    #[test]
    fn secrets_shadow_the_default_environment() {
        let store: EnvStore = serde_json::from_str(
            r#"{"default": {"token": "plain", "host": "h"}, "secrets": {"token": "hidden"}}"#,
        )
        .unwrap();
        let merged = store.resolve_all();
        assert_eq!(merged["token"], "hidden");
        assert_eq!(merged["host"], "h");
    }
}
