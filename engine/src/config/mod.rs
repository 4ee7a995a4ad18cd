//! Configuration management
//!
//! This module handles loading, validation, and management of the Sentinel
//! configuration. Configuration is stored in TOML format at
//! ~/.sentinel/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory and log level
//! - **inference**: llama.cpp server endpoint, grammar file, sampling
//! - **agent**: Iteration caps per execution mode
//!
//! # Path Expansion
//!
//! `~` in paths expands to the user's home directory. The data directory is
//! created on first use.
//!
//! # Examples
//!
//! ```no_run
//! use sentinel_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Inference server: {}", config.inference.base_url);
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};

use crate::inference::llama_server::SamplingParams;
use crate::state::{DEFAULT_MAX_ITERATIONS, PLAN_MODE_MAX_ITERATIONS};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Inference server configuration
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Agent execution configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion); holds the session file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Inference server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the llama.cpp server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional GBNF grammar file constraining structured completions
    #[serde(default)]
    pub grammar_path: Option<PathBuf>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum tokens per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            grammar_path: None,
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl InferenceConfig {
    /// Sampling parameters for the provider
    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        }
    }

    /// Load the grammar file, if one is configured
    ///
    /// A configured-but-unreadable grammar is a configuration error rather
    /// than something to silently run without.
    pub fn load_grammar(&self) -> Result<Option<String>, EngineError> {
        match &self.grammar_path {
            None => Ok(None),
            Some(path) => {
                let path = expand_path(path)?;
                let grammar = fs::read_to_string(&path).map_err(|e| {
                    EngineError::Config(format!(
                        "Failed to read grammar file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Some(grammar))
            }
        }
    }
}

/// Agent execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration cap for single-shot turns
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Iteration cap for plan-mode turns
    #[serde(default = "default_plan_max_iterations")]
    pub plan_max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            plan_max_iterations: default_plan_max_iterations(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.sentinel")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    256
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_plan_max_iterations() -> u32 {
    PLAN_MODE_MAX_ITERATIONS
}

impl Config {
    /// Load configuration from the default location, creating it with
    /// defaults on first run
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Path of the session file inside the data directory
    pub fn sessions_path(&self) -> PathBuf {
        self.core.data_dir.join("sessions.json")
    }

    /// Create default configuration and save it to `path`
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self {
            core: CoreConfig::default(),
            inference: InferenceConfig::default(),
            agent: AgentConfig::default(),
        };

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.sentinel/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".sentinel").join("config.toml"))
    }

    /// Validate values and expand paths
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        if self.agent.max_iterations == 0 {
            return Err(EngineError::Config(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.agent.plan_max_iterations < self.agent.max_iterations {
            return Err(EngineError::Config(
                "agent.plan_max_iterations must not be below agent.max_iterations".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(EngineError::Config(
                "inference.temperature must be within 0.0..=2.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.inference.top_p) {
            return Err(EngineError::Config(
                "inference.top_p must be within 0.0..=1.0".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
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
