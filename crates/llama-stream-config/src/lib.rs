//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! environment variables, then command-line overrides. [`ServerConfig::validate`]
//! runs once after all layers are applied.

use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use llama_stream_types::DialectKind;

pub const DEFAULT_PORT: u16 = 8443;
pub const DEFAULT_MAX_TOKENS: usize = 2048;

pub const ENV_USERNAME: &str = "AI_USERNAME";
pub const ENV_PASSWORD: &str = "AI_PASSWORD";
pub const ENV_MODEL_SIZE: &str = "MODEL_SIZE";
pub const ENV_CUDA_ARCH: &str = "CUDA_ARCH";
pub const ENV_DIALECT: &str = "LLAMA_STREAM_DIALECT";
pub const ENV_HOST: &str = "LLAMA_STREAM_HOST";
pub const ENV_PORT: &str = "LLAMA_STREAM_PORT";
pub const ENV_MODEL_PATH: &str = "LLAMA_STREAM_MODEL_PATH";
pub const ENV_LOG_LEVEL: &str = "LLAMA_STREAM_LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Model size profile, as selected by `MODEL_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    /// CPU build.
    Small,
    #[default]
    Medium,
    Large,
}

impl std::str::FromStr for ModelSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            other => Err(format!("expected small, medium or large, got {other:?}")),
        }
    }
}

/// Resource parameters handed to the inference backend when it loads a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelParams {
    pub context_size: u32,
    pub batch_size: u32,
    pub threads: u32,
    /// `-1` offloads every layer.
    pub gpu_layers: i32,
}

impl ModelSize {
    pub fn profile(self) -> ModelParams {
        match self {
            ModelSize::Small => ModelParams {
                context_size: 4096,
                batch_size: 512,
                threads: 8,
                gpu_layers: 0,
            },
            ModelSize::Medium => ModelParams {
                context_size: 6000,
                batch_size: 512,
                threads: 8,
                gpu_layers: -1,
            },
            ModelSize::Large => ModelParams {
                context_size: 42000,
                batch_size: 512,
                threads: 6,
                gpu_layers: -1,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: Option<PathBuf>,
    pub size: ModelSize,
    /// Whether a GPU is available. Without one the small profile is used.
    pub gpu: bool,
    pub context_size: Option<u32>,
    pub batch_size: Option<u32>,
    pub threads: Option<u32>,
    pub gpu_layers: Option<i32>,
}

impl ModelConfig {
    pub fn effective_size(&self) -> ModelSize {
        if self.gpu {
            self.size
        } else {
            ModelSize::Small
        }
    }

    /// Explicit values over the size profile.
    pub fn params(&self) -> ModelParams {
        let profile = self.effective_size().profile();
        ModelParams {
            context_size: self.context_size.unwrap_or(profile.context_size),
            batch_size: self.batch_size.unwrap_or(profile.batch_size),
            threads: self.threads.unwrap_or(profile.threads),
            gpu_layers: self.gpu_layers.unwrap_or(profile.gpu_layers),
        }
    }
}

/// HTTP Basic credentials. Generation requests are refused until both are set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dialect: DialectKind,
    pub auth: AuthConfig,
    pub max_tokens: usize,
    /// Pending requests accepted before callers have to wait.
    pub queue_capacity: usize,
    /// Events buffered between the generator and a slow client.
    pub event_buffer: usize,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub model: ModelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            dialect: DialectKind::Gemma,
            auth: AuthConfig::default(),
            max_tokens: DEFAULT_MAX_TOKENS,
            queue_capacity: 16,
            event_buffer: 64,
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            model: ModelConfig::default(),
        }
    }
}

/// Command-line overrides, applied last.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dialect: Option<DialectKind>,
    pub max_tokens: Option<usize>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub model_path: Option<PathBuf>,
    pub model_size: Option<ModelSize>,
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
        key,
        reason: e.to_string(),
        value,
    })
}

impl ServerConfig {
    /// Defaults, then `file` if given.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Full layering with the process environment.
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup(ENV_USERNAME) {
            self.auth.username = Some(username);
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.auth.password = Some(password);
        }
        if let Some(size) = lookup(ENV_MODEL_SIZE) {
            self.model.size = parse_env(ENV_MODEL_SIZE, size)?;
        }
        if lookup(ENV_CUDA_ARCH).is_some_and(|arch| !arch.is_empty()) {
            self.model.gpu = true;
        }
        if let Some(dialect) = lookup(ENV_DIALECT) {
            self.dialect = parse_env(ENV_DIALECT, dialect)?;
        }
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = parse_env(ENV_PORT, port)?;
        }
        if let Some(path) = lookup(ENV_MODEL_PATH) {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(host) = &overrides.host {
            self.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(dialect) = overrides.dialect {
            self.dialect = dialect;
        }
        if let Some(max_tokens) = overrides.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(dir) = &overrides.log_dir {
            self.log_dir = dir.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(path) = &overrides.model_path {
            self.model.path = Some(path.clone());
        }
        if let Some(size) = overrides.model_size {
            self.model.size = size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must not be 0".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Invalid("max_tokens must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 || self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity and event_buffer must be at least 1".to_string(),
            ));
        }
        match (&self.auth.username, &self.auth.password) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "set both {ENV_USERNAME} and {ENV_PASSWORD}, or neither"
                )));
            }
            _ => {}
        }
        if !self.model.gpu && self.model.size != ModelSize::Small {
            warn!(
                "No GPU configured ({ENV_CUDA_ARCH} unset), using the small model profile instead of {:?}",
                self.model.size
            );
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
