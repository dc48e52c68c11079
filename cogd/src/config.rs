//! cogd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main cogd configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for task and session logs
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,

    /// Root for credential files
    #[serde(rename = "auth-dir")]
    pub auth_dir: PathBuf,

    /// LLM limits
    pub llm: LlmConfig,

    /// Agent limits
    pub agent: AgentConfig,

    /// Tool execution defaults
    pub tools: ToolsConfig,

    /// Session compaction
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .cogd.yml
        let local_config = PathBuf::from(".cogd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/cogd/cogd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cogd").join("cogd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cogd")
}

/// LLM limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM call semaphore capacity
    #[serde(rename = "max-concurrent-calls")]
    pub max_concurrent_calls: usize,

    /// Optional override for token estimation; otherwise the adapter's
    /// reported context window is used
    #[serde(rename = "context-window")]
    pub context_window: Option<u64>,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            context_window: None,
            max_tokens: 8192,
        }
    }
}

/// Agent limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Soft cap for registry warnings
    #[serde(rename = "max-active-tasks")]
    pub max_active_tasks: usize,

    /// Tool execution semaphore capacity
    #[serde(rename = "max-concurrent-tools")]
    pub max_concurrent_tools: usize,

    /// Guard against runaway reasoning
    #[serde(rename = "max-cognitive-iterations")]
    pub max_cognitive_iterations: u32,

    /// Default wait timeout in seconds, e.g. for submit observing its task
    #[serde(rename = "task-timeout")]
    pub task_timeout: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_active_tasks: 100,
            max_concurrent_tools: 8,
            max_cognitive_iterations: 10,
            task_timeout: 30,
        }
    }
}

/// Tool execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Per-tool default timeout in seconds; capped by the executor's
    /// absolute maximum
    pub timeout: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { timeout: 30 }
    }
}

/// Session compaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fraction of the context window that triggers compaction
    #[serde(rename = "compact-threshold")]
    pub compact_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { compact_threshold: 0.8 }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            auth_dir: data_dir.join("auth"),
            data_dir,
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.max_concurrent_calls, 4);
        assert_eq!(config.agent.max_cognitive_iterations, 10);
        assert_eq!(config.tools.timeout, 30);
        assert!((config.session.compact_threshold - 0.8).abs() < f64::EPSILON);
        assert!(config.auth_dir.starts_with(&config.data_dir));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
data-dir: /tmp/cogd-data
auth-dir: /tmp/cogd-auth

llm:
  max-concurrent-calls: 2
  context-window: 50000

agent:
  max-active-tasks: 10
  max-concurrent-tools: 3
  max-cognitive-iterations: 5
  task-timeout: 15

tools:
  timeout: 60

session:
  compact-threshold: 0.9
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/cogd-data"));
        assert_eq!(config.llm.max_concurrent_calls, 2);
        assert_eq!(config.llm.context_window, Some(50_000));
        assert_eq!(config.agent.max_cognitive_iterations, 5);
        assert_eq!(config.tools.timeout, 60);
        assert!((config.session.compact_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
agent:
  max-cognitive-iterations: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.agent.max_cognitive_iterations, 3);
        assert_eq!(config.agent.max_concurrent_tools, 8);
        assert_eq!(config.llm.max_concurrent_calls, 4);
    }

    #[test]
    #[serial_test::serial]
    fn test_load_missing_defaults() {
        // Reads the cwd-relative fallback chain, so serialized
        let config = Config::load(None).unwrap();
        assert_eq!(config.agent.max_active_tasks, 100);
    }
}
