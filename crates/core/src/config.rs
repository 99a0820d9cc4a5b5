//! Configuration management for Courier.

use crate::chat::responder::ResponsePolicy;
use crate::chat::types::Sender;
use crate::error::{Error, Result};
use crate::platform;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of messages kept in the offline cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Retry settings shared by message sends and image uploads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Attempt `k` is followed by a wait of `k * base_delay_ms`.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// Settings for the AI responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// When an outgoing message should get a generated reply.
    #[serde(default)]
    pub policy: ResponsePolicy,

    /// Reserved sender id used for generated replies.
    pub sender_id: String,

    /// Display name used for generated replies.
    pub sender_name: String,

    /// Delay between the user message and the generated reply.
    pub reply_delay_ms: u64,

    /// Delay before the "assistant unavailable" notice.
    pub unavailable_delay_ms: u64,

    /// Base URL of the generation API.
    pub endpoint: String,

    /// Model name passed to the generation API.
    pub model: String,

    /// API key (None = read `COURIER_GENERATOR_API_KEY`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout for generation calls.
    pub timeout_secs: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            policy: ResponsePolicy::default(),
            sender_id: "assistant".to_string(),
            sender_name: "Assistant".to_string(),
            reply_delay_ms: 800,
            unavailable_delay_ms: 500,
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl ResponderConfig {
    /// Author used for generated replies.
    pub fn sender(&self) -> Sender {
        Sender::new(self.sender_id.clone(), self.sender_name.clone())
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    pub fn unavailable_delay(&self) -> Duration {
        Duration::from_millis(self.unavailable_delay_ms)
    }
}

/// Settings for the image upload service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    /// Upload API base URL.
    pub endpoint: String,

    /// Account (cloud) name; uploads are disabled without it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_name: Option<String>,

    /// Unsigned upload preset.
    pub upload_preset: String,

    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.cloudinary.com/v1_1".to_string(),
            cloud_name: None,
            upload_preset: "ml_default".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Settings for the TCP reachability probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// `host:port` to connect to (None = no probing, connectivity is pushed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Seconds between probes.
    pub interval_secs: u64,

    /// Connect timeout per probe.
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            address: None,
            interval_secs: 5,
            timeout_secs: 3,
        }
    }
}

/// Main configuration struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the local message database.
    pub data_dir: PathBuf,

    /// Number of most recent messages kept in the offline cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Retry policy for sends and uploads.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout for a single remote append attempt.
    #[serde(default = "default_append_timeout")]
    pub append_timeout_secs: u64,

    /// AI responder settings.
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Image upload settings.
    #[serde(default)]
    pub upload: UploadConfig,

    /// Connectivity probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_append_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: platform::data_dir(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            retry: RetryConfig::default(),
            append_timeout_secs: default_append_timeout(),
            responder: ResponderConfig::default(),
            upload: UploadConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        Self::load_from(&platform::config_file_path())
    }

    /// Load configuration from a specific file, or defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let mut config: Config = serde_json::from_str(&contents)?;
            config.fix_invalid_values();
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Fix any invalid or empty values with sensible defaults.
    fn fix_invalid_values(&mut self) {
        if self.data_dir.as_os_str().is_empty() {
            self.data_dir = platform::data_dir();
        }
        if self.cache_capacity == 0 {
            self.cache_capacity = DEFAULT_CACHE_CAPACITY;
        }
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = RetryConfig::default().max_attempts;
        }
        if self.append_timeout_secs == 0 {
            self.append_timeout_secs = default_append_timeout();
        }
    }

    /// Save configuration to the default config file.
    pub fn save(&mut self) -> Result<()> {
        self.save_to(&platform::config_file_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        self.fix_invalid_values();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Load configuration from environment variables, falling back to file/defaults.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `COURIER_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("COURIER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(key) = std::env::var("COURIER_GENERATOR_API_KEY") {
            if !key.trim().is_empty() {
                self.responder.api_key = Some(key);
            }
        }

        if let Ok(name) = std::env::var("COURIER_UPLOAD_CLOUD_NAME") {
            if !name.trim().is_empty() {
                self.upload.cloud_name = Some(name);
            }
        }

        if let Ok(policy) = std::env::var("COURIER_AI_POLICY") {
            self.responder.policy = policy.parse().map_err(Error::Config)?;
        }

        Ok(())
    }

    /// Retry policy built from the `retry` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
    }

    /// Timeout applied to each remote append attempt.
    pub fn append_timeout(&self) -> Duration {
        Duration::from_secs(self.append_timeout_secs)
    }

    /// Path of the local message database.
    pub fn database_path(&self) -> PathBuf {
        platform::database_path(&self.data_dir)
    }
}
