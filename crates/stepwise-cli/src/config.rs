//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stepwise_agent::AgentConfig;
use stepwise_ai::Provider;

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Configuration for stepwise
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider (anthropic, openai, groq, openrouter, ollama, custom)
    pub provider: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Endpoint override; required for `custom`
    pub base_url: Option<String>,
    /// Maximum output tokens per policy call
    pub max_tokens: Option<u32>,
    /// Retries for transient policy failures
    pub retries: Option<u32>,
    /// Seconds before a single policy HTTP call is abandoned
    pub request_timeout_secs: Option<u64>,
    /// Evaluation rounds when gathering file context
    pub max_context_rounds: Option<u32>,
    /// Policy turns allowed per step before the run is aborted
    pub max_turns_per_step: Option<u32>,
    pub shell_timeout_secs: Option<u64>,
    /// Extra glob patterns the agent may never read
    pub disallowed_paths: Vec<String>,
    /// Commit and push when a task finishes
    pub finalize: Option<bool>,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
    pub custom: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stepwise")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STEPWISE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from a file; a missing or broken file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to parse config file: {e}");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read config file: {e}");
                Self::default()
            }
        }
    }

    /// Write the example config to `path` unless a file already exists there
    pub fn init_at(path: &Path) -> std::io::Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())?;
        Ok(path.to_path_buf())
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        Self::init_at(&Self::config_path())
    }

    /// API key from the config file; the provider client falls back to the
    /// environment.
    pub fn get_api_key(&self, provider: Provider) -> Option<String> {
        match provider {
            Provider::Anthropic => self.api_keys.anthropic.clone(),
            Provider::OpenAI => self.api_keys.openai.clone(),
            Provider::Groq => self.api_keys.groq.clone(),
            Provider::OpenRouter => self.api_keys.openrouter.clone(),
            Provider::Custom => self.api_keys.custom.clone(),
            Provider::Ollama => None,
        }
    }

    /// Engine settings, with defaults for anything unset
    pub fn agent_config(&self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            max_context_rounds: self.max_context_rounds.unwrap_or(defaults.max_context_rounds),
            max_turns_per_step: self.max_turns_per_step.unwrap_or(defaults.max_turns_per_step),
            shell_timeout: self
                .shell_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.shell_timeout),
            disallowed_paths: self.disallowed_paths.clone(),
            finalize: self.finalize.unwrap_or(defaults.finalize),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# stepwise configuration file
# Place at ~/.config/stepwise/config.toml or point STEPWISE_CONFIG_PATH at it

# Provider (anthropic, openai, groq, openrouter, ollama, custom)
provider = "anthropic"

# Model to use
model = "claude-sonnet-4-5-20250929"

# Endpoint override (required for provider = "custom")
# base_url = "http://localhost:8080/v1"

# Retries for rate limits, timeouts and transient server errors
retries = 3

# Seconds before one model API call is abandoned (and retried)
request_timeout_secs = 300

# Evaluation rounds when gathering file context
max_context_rounds = 3

# Policy turns allowed per step
max_turns_per_step = 40

# Timeout for run_shell commands
shell_timeout_secs = 120

# Extra glob patterns the agent may never read (added to .env, keys, .git, ...)
disallowed_paths = []

# Commit and push when a task finishes
finalize = true

# API keys (optional - can also use environment variables)
[api_keys]
# anthropic = "sk-ant-..."
# openai = "sk-..."
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.provider.as_deref(), Some("anthropic"));
        assert_eq!(config.max_turns_per_step, Some(40));
        assert_eq!(config.finalize, Some(true));
        assert_eq!(config.request_timeout_secs, Some(300));
        assert!(config.disallowed_paths.is_empty());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(&dir.path().join("none.toml")), Config::default());
    }

    #[test]
    fn test_broken_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "provider = [").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }

    #[test]
    fn test_init_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        Config::init_at(&path).unwrap();
        fs::write(&path, "model = \"mine\"").unwrap();
        Config::init_at(&path).unwrap();
        assert_eq!(Config::load_from(&path).model.as_deref(), Some("mine"));
    }

    #[test]
    fn test_agent_config_mapping() {
        let config: Config = toml::from_str(
            r#"
            max_context_rounds = 5
            shell_timeout_secs = 9
            disallowed_paths = ["vendor/**"]
            finalize = false
            [api_keys]
            openai = "sk-test"
            "#,
        )
        .unwrap();
        let agent = config.agent_config();
        assert_eq!(agent.max_context_rounds, 5);
        assert_eq!(agent.max_turns_per_step, 40);
        assert_eq!(agent.shell_timeout, Duration::from_secs(9));
        assert_eq!(agent.disallowed_paths, vec!["vendor/**"]);
        assert!(!agent.finalize);
        assert_eq!(config.get_api_key(Provider::OpenAI).as_deref(), Some("sk-test"));
        assert_eq!(config.get_api_key(Provider::Anthropic), None);
    }
}
