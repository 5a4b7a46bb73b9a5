//! Configuration management
//!
//! This module handles loading, validation, and management of the switchboard
//! configuration. Configuration is stored in TOML format at
//! ~/.switchboard/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Provider settings and the preferred provider
//! - **orchestrator**: Dispatch round guard and worker tool-loop bounds
//! - **knowledge**: Policy document store location and lookup depth
//! - **search**: External web search endpoint
//! - **metro**: Fare table and train timetable served by the ticket tools
//! - **session**: Durable session store backend
//!
//! # Path Expansion
//!
//! `~` is expanded to the user's home directory in every path setting, and
//! the data directory is created if it does not exist.
//!
//! # Examples
//!
//! ```no_run
//! use switchboard_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Providers the router knows how to build
pub const VALID_PROVIDERS: [&str; 2] = ["ollama", "openai"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// Turn orchestration bounds
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Policy knowledge store
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// External web search
    #[serde(default)]
    pub search: SearchConfig,

    /// Metro business data
    #[serde(default)]
    pub metro: MetroConfig,

    /// Session persistence
    #[serde(default)]
    pub session: SessionConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Preferred provider (ollama, openai)
    pub default_provider: String,

    /// Sampling temperature passed to every provider
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Timeout for local providers (seconds)
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    /// Timeout for cloud providers (seconds)
    #[serde(default = "default_cloud_timeout")]
    pub cloud_timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI-compatible chat completions configuration (OpenAI, DeepSeek, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for the chat completions API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Name of the secret holding the API key
    #[serde(default = "default_openai_key_name")]
    pub api_key_name: String,
}

/// Turn orchestration bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum dispatch rounds per turn before summarizing with what is done
    #[serde(default = "default_max_dispatch_rounds")]
    pub max_dispatch_rounds: u32,

    /// Maximum model calls in one worker's tool loop
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,

    /// Number of earlier history entries handed to workers and the aggregator
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

/// Policy knowledge store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// SQLite database path (defaults to `<data_dir>/knowledge.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Number of clauses returned per lookup
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// External web search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Enable the judge worker's web search tool
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// DuckDuckGo Instant Answer endpoint
    #[serde(default = "default_search_base_url")]
    pub base_url: String,

    /// Maximum related topics included in a result
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,

    /// Request timeout (seconds)
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

/// One symmetric fare between two stations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRule {
    pub from: String,
    pub to: String,
    /// Fare in yuan
    pub fare: u32,
}

/// First and last train times for a station (HH:MM)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainTimes {
    pub first: String,
    pub last: String,
}

/// Metro business data served by the ticket and complaint tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetroConfig {
    /// Fare table
    #[serde(default = "default_fares")]
    pub fares: Vec<FareRule>,

    /// First train time used when a station has no override
    #[serde(default = "default_first_train")]
    pub first_train: String,

    /// Last train time used when a station has no override
    #[serde(default = "default_last_train")]
    pub last_train: String,

    /// Per-station timetable overrides
    #[serde(default)]
    pub timetable: HashMap<String, TrainTimes>,

    /// Promised complaint response time (hours)
    #[serde(default = "default_complaint_sla_hours")]
    pub complaint_sla_hours: u32,
}

/// Session store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Sqlite,
    Memory,
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_backend")]
    pub backend: SessionBackend,

    /// SQLite database path (defaults to `<data_dir>/sessions.db`)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.switchboard")
}

fn default_temperature() -> f32 {
    0.3
}

fn default_local_timeout() -> u64 {
    120
}

fn default_cloud_timeout() -> u64 {
    60
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:7b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}

fn default_openai_model() -> String {
    "deepseek-chat".to_string()
}

fn default_openai_key_name() -> String {
    "openai_api_key".to_string()
}

fn default_max_dispatch_rounds() -> u32 {
    3
}

fn default_max_tool_iterations() -> usize {
    6
}

fn default_history_window() -> usize {
    20
}

fn default_top_k() -> usize {
    3
}

fn default_search_base_url() -> String {
    "https://api.duckduckgo.com".to_string()
}

fn default_search_max_results() -> usize {
    3
}

fn default_search_timeout() -> u64 {
    10
}

fn default_fares() -> Vec<FareRule> {
    vec![
        FareRule {
            from: "杭州东站".to_string(),
            to: "武林广场".to_string(),
            fare: 4,
        },
        FareRule {
            from: "萧山机场".to_string(),
            to: "武林广场".to_string(),
            fare: 7,
        },
        FareRule {
            from: "龙朔".to_string(),
            to: "西湖".to_string(),
            fare: 5,
        },
    ]
}

fn default_first_train() -> String {
    "06:05".to_string()
}

fn default_last_train() -> String {
    "22:30".to_string()
}

fn default_complaint_sla_hours() -> u32 {
    24
}

fn default_session_backend() -> SessionBackend {
    SessionBackend::Sqlite
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_name: default_openai_key_name(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: "ollama".to_string(),
            temperature: default_temperature(),
            local_timeout_secs: default_local_timeout(),
            cloud_timeout_secs: default_cloud_timeout(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_dispatch_rounds: default_max_dispatch_rounds(),
            max_tool_iterations: default_max_tool_iterations(),
            history_window: default_history_window(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            top_k: default_top_k(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_search_base_url(),
            max_results: default_search_max_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for MetroConfig {
    fn default() -> Self {
        Self {
            fares: default_fares(),
            first_train: default_first_train(),
            last_train: default_last_train(),
            timetable: HashMap::new(),
            complaint_sla_hours: default_complaint_sla_hours(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            db_path: None,
        }
    }
}

impl Default for Config {
    /// Unvalidated defaults; paths still contain `~`
    fn default() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            knowledge: KnowledgeConfig::default(),
            search: SearchConfig::default(),
            metro: MetroConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.switchboard/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails or
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there first if missing
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Written before processing so the file keeps the portable `~` paths
        let toml_string = toml::to_string_pretty(&Self::default())
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = Self::default();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.switchboard/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".switchboard").join("config.toml"))
    }

    /// Resolved knowledge database path
    pub fn knowledge_db_path(&self) -> PathBuf {
        self.knowledge
            .db_path
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("knowledge.db"))
    }

    /// Resolved session database path
    pub fn session_db_path(&self) -> PathBuf {
        self.session
            .db_path
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("sessions.db"))
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges, expands `~` in paths and creates the data
    /// directory when it is missing.
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if !VALID_PROVIDERS.contains(&self.llm.default_provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                VALID_PROVIDERS.join(", ")
            )));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(EngineError::Config(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.orchestrator.max_dispatch_rounds == 0 {
            return Err(EngineError::Config(
                "max_dispatch_rounds must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_tool_iterations == 0 {
            return Err(EngineError::Config(
                "max_tool_iterations must be at least 1".to_string(),
            ));
        }

        if self.knowledge.top_k == 0 || self.knowledge.top_k > 20 {
            return Err(EngineError::Config(
                "knowledge.top_k must be between 1 and 20".to_string(),
            ));
        }

        for rule in &self.metro.fares {
            if rule.from.trim().is_empty() || rule.to.trim().is_empty() {
                return Err(EngineError::Config(
                    "metro.fares entries need both 'from' and 'to' stations".to_string(),
                ));
            }
        }

        let mut times = vec![&self.metro.first_train, &self.metro.last_train];
        for t in self.metro.timetable.values() {
            times.push(&t.first);
            times.push(&t.last);
        }
        if let Some(bad) = times.into_iter().find(|t| !is_clock_time(t)) {
            return Err(EngineError::Config(format!(
                "Invalid train time '{}'. Expected HH:MM",
                bad
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if let Some(path) = &self.knowledge.db_path {
            self.knowledge.db_path = Some(expand_path(path)?);
        }
        if let Some(path) = &self.session.db_path {
            self.session.db_path = Some(expand_path(path)?);
        }

        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

fn is_clock_time(s: &str) -> bool {
    match s.split_once(':') {
        Some((h, m)) if h.len() == 2 && m.len() == 2 => {
            matches!((h.parse::<u8>(), m.parse::<u8>()), (Ok(h), Ok(m)) if h < 24 && m < 60)
        }
        _ => false,
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
