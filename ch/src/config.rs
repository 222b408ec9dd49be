//! Chorus configuration types and loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Main chorus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Model price table, USD per million tokens
    pub pricing: HashMap<String, ModelPrice>,

    /// Pipeline defaults
    pub pipeline: PipelineConfig,

    /// Where sessions and the job queue live
    pub storage: StorageConfig,

    /// Worker pool and in-flight registry
    pub jobs: JobsConfig,

    /// HTTP transport
    pub server: ServerConfig,

    /// Log level used when no --log-level is given
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            pricing: default_pricing(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            jobs: JobsConfig::default(),
            server: ServerConfig::default(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.chorus.yml`, then `~/.config/chorus/chorus.yml`,
    /// then built-in defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let paths: Vec<PathBuf> = match config_path {
            Some(p) => vec![p.clone()],
            None => Self::candidates(),
        };
        paths
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(&p).ok())
            .and_then(|c| c.log_level)
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".chorus.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("chorus").join("chorus.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "anthropic" or "openai"
    pub provider: String,

    /// Environment variable holding the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        debug!(env = %self.api_key_env, "LlmConfig::api_key: called");
        std::env::var(&self.api_key_env)
            .map_err(|_| eyre::eyre!("LLM API key not found. Set the {} environment variable.", self.api_key_env))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// Price of one model, USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    #[serde(rename = "input-per-mtok")]
    pub input_per_mtok: f64,

    #[serde(rename = "output-per-mtok")]
    pub output_per_mtok: f64,
}

impl ModelPrice {
    pub fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }
}

/// Built-in price table used when the config has none
pub fn default_pricing() -> HashMap<String, ModelPrice> {
    [
        ("claude-sonnet-4", ModelPrice::new(3.0, 15.0)),
        ("claude-opus-4", ModelPrice::new(15.0, 75.0)),
        ("claude-3-5-haiku", ModelPrice::new(0.8, 4.0)),
        ("gpt-4o", ModelPrice::new(2.5, 10.0)),
        ("gpt-4o-mini", ModelPrice::new(0.15, 0.6)),
    ]
    .into_iter()
    .map(|(name, price)| (name.to_string(), price))
    .collect()
}

/// Pipeline defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Model used when a request names none
    #[serde(rename = "default-model")]
    pub default_model: String,

    /// Upper bound on perspectives per request
    #[serde(rename = "max-perspectives")]
    pub max_perspectives: u32,

    /// Run participants one at a time unless the request says otherwise
    #[serde(rename = "serial-fan-out")]
    pub serial_fan_out: bool,

    /// Cap on concurrent participant calls, 0 for no cap
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: usize,

    /// Model rounds a tool-enabled participant may use
    #[serde(rename = "max-tool-iterations")]
    pub max_tool_iterations: u32,

    /// Estimate reported back to submitters
    #[serde(rename = "seconds-per-perspective")]
    pub seconds_per_perspective: u64,

    /// Directory of prompt template overrides
    #[serde(rename = "prompts-dir")]
    pub prompts_dir: Option<PathBuf>,

    /// Directory the read_file tool may read from
    #[serde(rename = "reference-dir")]
    pub reference_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-20250514".to_string(),
            max_perspectives: 12,
            serial_fan_out: false,
            max_concurrency: 0,
            max_tool_iterations: 8,
            seconds_per_perspective: 45,
            prompts_dir: None,
            reference_dir: None,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of all durable state
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl StorageConfig {
    /// Session files and lock records
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Durable job queue
    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    /// Pid and stderr files of running job processes
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chorus"),
        }
    }
}

/// Which in-flight registry backs the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryKind {
    /// Lock records on disk, survive restarts
    #[default]
    File,
    /// Process-local set
    Memory,
}

/// How workers execute a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    /// Spawn `chorus run-job` per job
    #[default]
    Process,
    /// Run on a tokio task inside the daemon
    InProcess,
}

/// Worker pool and registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Number of worker tasks
    pub workers: usize,

    pub registry: RegistryKind,

    /// Lock lifetime without a heartbeat
    #[serde(rename = "lock-ttl-secs")]
    pub lock_ttl_secs: u64,

    /// Interval between lock heartbeats while a job runs
    #[serde(rename = "heartbeat-secs")]
    pub heartbeat_secs: u64,

    /// Fallback queue scan interval
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    pub execution: ExecutionKind,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            registry: RegistryKind::File,
            lock_ttl_secs: 600,
            heartbeat_secs: 30,
            poll_interval_secs: 5,
            execution: ExecutionKind::Process,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve HTTP from the daemon
    pub enabled: bool,

    /// Bind address
    pub listen: String,

    /// Base of the checkUrl handed back to submitters
    #[serde(rename = "public-base-url")]
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:7878".to_string(),
            public_base_url: "http://127.0.0.1:7878".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.pipeline.seconds_per_perspective, 45);
        assert_eq!(config.jobs.registry, RegistryKind::File);
        assert!(config.pricing.contains_key("gpt-4o"));
        assert!(config.storage.sessions_dir().ends_with("chorus/sessions"));
    }

    #[test]
    fn test_default_includes_pricing() {
        let config: Config = serde_yaml::from_str("log-level: debug").unwrap();
        assert!(config.pricing.contains_key("claude-sonnet-4"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: openai
  api-key-env: MY_KEY
  base-url: https://api.openai.com
pricing:
  gpt-4o:
    input-per-mtok: 2.5
    output-per-mtok: 10.0
pipeline:
  default-model: gpt-4o
  serial-fan-out: true
  max-concurrency: 3
storage:
  data-dir: /tmp/chorus-test
jobs:
  workers: 4
  registry: memory
  execution: in-process
server:
  listen: 0.0.0.0:9000
  public-base-url: https://chorus.example.com
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.max_tokens, 16384);
        assert_eq!(config.pricing.len(), 1);
        assert!(config.pipeline.serial_fan_out);
        assert_eq!(config.pipeline.max_concurrency, 3);
        assert_eq!(config.pipeline.max_perspectives, 12);
        assert_eq!(config.storage.queue_dir(), PathBuf::from("/tmp/chorus-test/queue"));
        assert_eq!(config.jobs.workers, 4);
        assert_eq!(config.jobs.registry, RegistryKind::Memory);
        assert_eq!(config.jobs.execution, ExecutionKind::InProcess);
        assert_eq!(config.server.public_base_url, "https://chorus.example.com");
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chorus.yml");
        fs::write(&path, "log-level: warn\npipeline:\n  max-perspectives: 4\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.pipeline.max_perspectives, 4);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("absent.yml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
