use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::SubmitError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_USER_AGENT: &str = "FormSubmitter (reqwest powered)";

#[derive(Clone, Debug)]
pub struct SubmitterConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept: String,
    pub csrf_token: String,
    pub verbose: bool,
    pub data_dir: Option<PathBuf>,
    pub log_level: String,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: String::new(),
            csrf_token: String::new(),
            verbose: false,
            data_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl SubmitterConfig {
    pub fn from_env() -> Result<Self, SubmitError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SubmitError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timeout = match lookup("FORM_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(raw.trim().parse().map_err(|_| {
                SubmitError::Config(format!("FORM_TIMEOUT_SECS must be a number of seconds, got {raw:?}"))
            })?),
            None => defaults.timeout,
        };

        let verbose = match lookup("FORM_VERBOSE") {
            Some(raw) => parse_flag(&raw)
                .ok_or_else(|| SubmitError::Config(format!("FORM_VERBOSE must be a boolean, got {raw:?}")))?,
            None => defaults.verbose,
        };

        Ok(Self {
            timeout,
            user_agent: lookup("FORM_USER_AGENT").unwrap_or(defaults.user_agent),
            accept: lookup("FORM_ACCEPT").unwrap_or_default(),
            csrf_token: lookup("FORM_CSRF_TOKEN").unwrap_or_default(),
            verbose,
            data_dir: lookup("FORM_DATA_DIR").filter(|dir| !dir.is_empty()).map(PathBuf::from),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }

    // Relative attachment paths are looked up under the data directory when one is set
    pub fn resolve_path(&self, path: &std::path::Path) -> PathBuf {
        match &self.data_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = SubmitterConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(config.accept.is_empty());
        assert!(config.csrf_token.is_empty());
        assert!(!config.verbose);
        assert!(config.data_dir.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_reads_overrides() {
        let config = SubmitterConfig::from_lookup(lookup_from(&[
            ("FORM_TIMEOUT_SECS", "3"),
            ("FORM_USER_AGENT", "tester/1.0"),
            ("FORM_ACCEPT", "application/json"),
            ("FORM_CSRF_TOKEN", "tok"),
            ("FORM_VERBOSE", "yes"),
            ("FORM_DATA_DIR", "/srv/data"),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.user_agent, "tester/1.0");
        assert_eq!(config.accept, "application/json");
        assert_eq!(config.csrf_token, "tok");
        assert!(config.verbose);
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/data")));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_timeout_is_config_error() {
        let err = SubmitterConfig::from_lookup(lookup_from(&[("FORM_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, SubmitError::Config(_)));
    }

    #[test]
    fn test_invalid_verbose_is_config_error() {
        let err = SubmitterConfig::from_lookup(lookup_from(&[("FORM_VERBOSE", "maybe")])).unwrap_err();
        assert!(matches!(err, SubmitError::Config(_)));
    }

    #[test]
    fn test_resolve_path_uses_data_dir_for_relative_paths() {
        let config = SubmitterConfig {
            data_dir: Some(PathBuf::from("/srv/data")),
            ..SubmitterConfig::default()
        };
        assert_eq!(config.resolve_path(Path::new("a.txt")), PathBuf::from("/srv/data/a.txt"));
        assert_eq!(config.resolve_path(Path::new("/tmp/b.txt")), PathBuf::from("/tmp/b.txt"));

        let plain = SubmitterConfig::default();
        assert_eq!(plain.resolve_path(Path::new("a.txt")), PathBuf::from("a.txt"));
    }
}
