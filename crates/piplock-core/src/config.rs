use std::collections::HashMap;
use std::env;

use piplock_domain::Placeholders;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";
const DEFAULT_PIP_BIN: &str = "pip";

/// Process environment captured once per run. Everything downstream reads
/// from the snapshot rather than `std::env`.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn flag_is_enabled(&self, key: &str) -> bool {
        matches!(self.vars.get(key).map(String::as_str), Some("1"))
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) pip_bin: String,
    pub(crate) python: Option<String>,
    pub(crate) default_index_urls: Vec<String>,
    pub(crate) strict_env: bool,
    pub(crate) debug: bool,
    snapshot: EnvSnapshot,
}

impl Config {
    /// Builds a configuration from the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_snapshot(EnvSnapshot::capture())
    }

    #[must_use]
    pub fn from_snapshot(snapshot: EnvSnapshot) -> Self {
        let default_index_urls = snapshot
            .var("PIPLOCK_DEFAULT_INDEX_URLS")
            .map(split_urls)
            .filter(|urls| !urls.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_INDEX_URL.to_string()]);
        Self {
            pip_bin: snapshot
                .var("PIPLOCK_PIP_BIN")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_PIP_BIN)
                .to_string(),
            python: snapshot
                .var("PIPLOCK_PYTHON")
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            default_index_urls,
            strict_env: snapshot.flag_is_enabled("PIPLOCK_STRICT_ENV"),
            debug: snapshot.flag_is_enabled("PIPLOCK_DEBUG"),
            snapshot,
        }
    }

    #[must_use]
    pub fn pip_bin(&self) -> &str {
        &self.pip_bin
    }

    #[must_use]
    pub fn python(&self) -> Option<&str> {
        self.python.as_deref()
    }

    #[must_use]
    pub fn default_index_urls(&self) -> &[String] {
        &self.default_index_urls
    }

    #[must_use]
    pub fn strict_env(&self) -> bool {
        self.strict_env
    }

    #[must_use]
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Placeholder expansion backed by the captured environment.
    #[must_use]
    pub fn placeholders(&self) -> Placeholders {
        Placeholders::new(self.snapshot.vars.clone(), self.strict_env)
    }
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_overrides() {
        let config = Config::from_snapshot(EnvSnapshot::testing(&[]));
        assert_eq!(config.pip_bin(), "pip");
        assert_eq!(config.python(), None);
        assert_eq!(config.default_index_urls(), [DEFAULT_INDEX_URL.to_string()]);
        assert!(!config.strict_env());
        assert!(!config.debug());
    }

    #[test]
    fn reads_piplock_variables() {
        let config = Config::from_snapshot(EnvSnapshot::testing(&[
            ("PIPLOCK_PIP_BIN", "/opt/venv/bin/pip"),
            ("PIPLOCK_PYTHON", "python3.11"),
            (
                "PIPLOCK_DEFAULT_INDEX_URLS",
                "https://mirror.local/simple, https://pypi.org/simple,",
            ),
            ("PIPLOCK_STRICT_ENV", "1"),
            ("PIPLOCK_DEBUG", "true"),
        ]));
        assert_eq!(config.pip_bin(), "/opt/venv/bin/pip");
        assert_eq!(config.python(), Some("python3.11"));
        assert_eq!(
            config.default_index_urls(),
            [
                "https://mirror.local/simple".to_string(),
                "https://pypi.org/simple".to_string()
            ]
        );
        assert!(config.strict_env());
        assert!(!config.debug(), "only `1` enables flags");
        assert!(config.placeholders().is_strict());
    }

    #[test]
    fn placeholders_use_the_snapshot() {
        let config = Config::from_snapshot(EnvSnapshot::testing(&[("TOKEN", "s3cr3t")]));
        let expanded = config
            .placeholders()
            .expand("https://${TOKEN}@pkgs.local/simple")
            .expect("expanded");
        assert_eq!(expanded, "https://s3cr3t@pkgs.local/simple");
    }
}
