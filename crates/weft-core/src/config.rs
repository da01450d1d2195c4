use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level Weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Agent-invocation endpoint.
    #[serde(default)]
    pub agent: Option<EndpointConfig>,
    /// Function-executor endpoint.
    #[serde(default)]
    pub functions: Option<EndpointConfig>,
    /// Tool-invoker endpoint.
    #[serde(default)]
    pub tools: Option<EndpointConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Runtime logging configuration.
    #[serde(default)]
    pub log: Option<LogConfig>,
}

/// Scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-node execution timeout in seconds (0 = no timeout).
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    /// Pause between readiness waves in milliseconds.
    #[serde(default)]
    pub wave_pause_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_secs: default_node_timeout(),
            wave_pause_ms: 0,
        }
    }
}

fn default_node_timeout() -> u64 { 300 }

/// An HTTP collaborator endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_request_timeout() -> u64 { 120 }

/// Retry configuration for collaborator requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// JSONL run logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Enable run logging (default: true when section is present).
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// Directory for log files. Default: ~/.weft/logs
    #[serde(default)]
    pub log_dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

fn default_log_enabled() -> bool { true }

impl LogConfig {
    /// Resolve the log directory (expand ~).
    pub fn resolved_dir(&self) -> PathBuf {
        let dir = self.log_dir.as_deref().unwrap_or("~/.weft/logs");
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.node_timeout_secs, 300);
        assert_eq!(config.engine.wave_pause_ms, 0);
        assert!(config.agent.is_none());
        assert!(config.functions.is_none());
        assert!(config.log.is_none());
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_endpoint_sections() {
        let toml_str = r#"
[engine]
node_timeout_secs = 0
wave_pause_ms = 25

[agent]
url = "http://localhost:8080/agent"
api_key = "k"

[functions]
url = "http://localhost:8080/functions"
timeout_secs = 10
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.node_timeout_secs, 0);
        assert_eq!(config.engine.wave_pause_ms, 25);
        let agent = config.agent.unwrap();
        assert_eq!(agent.url, "http://localhost:8080/agent");
        assert_eq!(agent.timeout_secs, 120);
        assert_eq!(config.functions.unwrap().timeout_secs, 10);
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_log_dir_expands_home() {
        std::env::set_var("HOME", "/home/tester");
        let log = LogConfig {
            enabled: true,
            log_dir: Some("~/runs".into()),
        };
        assert_eq!(log.resolved_dir(), PathBuf::from("/home/tester/runs"));

        let abs = LogConfig {
            enabled: true,
            log_dir: Some("/var/log/weft".into()),
        };
        assert_eq!(abs.resolved_dir(), PathBuf::from("/var/log/weft"));
    }
}
