//! `studyflow.toml` configuration.
//!
//! Every section is optional. Environment variables override the file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STUDYFLOW_LLM_API_KEY` | `llm.api_key` |
//! | `STUDYFLOW_LLM_BASE_URL` | `llm.base_url` |
//! | `STUDYFLOW_LLM_MODEL` | `llm.model` |
//! | `STUDYFLOW_OTLP_ENDPOINT` | `telemetry.otlp_endpoint` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use llm::{Backoff, OpenAiConfig};
use serde::Deserialize;

/// Config file read when `--config` is not given, if present.
pub const DEFAULT_CONFIG_FILE: &str = "studyflow.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub llm: LlmConfig,
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
    pub figures: FiguresConfig,
    pub tools: ToolsConfig,
    pub telemetry: TelemetryConfig,
}

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the operators' temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Overrides the operators' per-call timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: None,
            timeout_secs: None,
            max_attempts: default_max_attempts(),
        }
    }
}

impl LlmConfig {
    pub fn provider_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            timeout: self.timeout_secs.map(Duration::from_secs),
            backoff: Backoff {
                max_attempts: self.max_attempts.max(1),
                ..Backoff::default()
            },
        }
    }
}

/// Content download settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            user_agent: None,
        }
    }
}

impl FetchConfig {
    pub fn fetcher_config(&self) -> fetch::FetchConfig {
        let defaults = fetch::FetchConfig::default();
        fetch::FetchConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Append-only JSONL event log.
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_path: default_journal_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FiguresConfig {
    /// Extract embedded PDF images. When off, no figures are found.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_figures_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_min_dimension")]
    pub min_width: u32,
    #[serde(default = "default_min_dimension")]
    pub min_height: u32,
}

impl Default for FiguresConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: default_figures_dir(),
            min_width: default_min_dimension(),
            min_height: default_min_dimension(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Extra tool manifests (`*.yaml`) loaded at startup.
    pub manifest_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP gRPC endpoint; tracing export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            log_level: default_log_level(),
            otlp_endpoint: None,
            service_name: default_service_name(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("studyflow-events.jsonl")
}

fn default_true() -> bool {
    true
}

fn default_figures_dir() -> PathBuf {
    PathBuf::from("figures")
}

fn default_min_dimension() -> u32 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "studyflow".to_string()
}

impl Config {
    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] when it exists, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `STUDYFLOW_*` overrides; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(key) = var("STUDYFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = var("STUDYFLOW_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = var("STUDYFLOW_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(endpoint) = var("STUDYFLOW_OTLP_ENDPOINT") {
            self.telemetry.otlp_endpoint = Some(endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.max_attempts, 5);
        assert_eq!(config.fetch.timeout_secs, 120);
        assert!(config.figures.enabled);
        assert_eq!(config.storage.journal_path, PathBuf::from("studyflow-events.jsonl"));
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn sections_are_read() {
        let config: Config = toml::from_str(
            r#"
            [llm]
            base_url = "http://localhost:11434/v1"
            model = "llama3"
            temperature = 0.2
            timeout_secs = 30
            max_attempts = 2

            [figures]
            enabled = false
            output_dir = "/tmp/figs"

            [tools]
            manifest_dir = "manifests"

            [telemetry]
            json = true
            "#,
        )
        .unwrap();

        let provider = config.llm.provider_config();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
        assert_eq!(provider.temperature, Some(0.2));
        assert_eq!(provider.timeout, Some(Duration::from_secs(30)));
        assert_eq!(provider.backoff.max_attempts, 2);
        assert!(!config.figures.enabled);
        assert_eq!(config.figures.min_width, 100);
        assert_eq!(config.tools.manifest_dir, Some(PathBuf::from("manifests")));
        assert!(config.telemetry.json);
        assert_eq!(config.telemetry.service_name, "studyflow");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("[llm]\nmodle = \"x\"\n").is_err());
    }

    #[test]
    fn environment_overrides_the_file() {
        let env = HashMap::from([
            ("STUDYFLOW_LLM_API_KEY", "sk-env"),
            ("STUDYFLOW_LLM_MODEL", "gpt-4o"),
            ("STUDYFLOW_LLM_BASE_URL", "  "),
            ("STUDYFLOW_OTLP_ENDPOINT", "http://collector:4317"),
        ]);
        let mut config = Config::default();

        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(
            config.telemetry.otlp_endpoint.as_deref(),
            Some("http://collector:4317")
        );
    }
}
