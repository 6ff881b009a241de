//! Configuration loaded from `~/.warden/config.toml`
//!
//! ```toml
//! [streaming]
//! min_chunk_size = 20
//! session_timeout_secs = 300
//!
//! [tools]
//! probe_timeout_secs = 3
//! default_probe_mode = "cached"
//!
//! [generation]
//! base_url = "http://localhost:11434/v1"
//! model = "llama3.1"
//! ```
//!
//! Every field is optional; a missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants;
use crate::error::ConfigError;
use crate::stream::BridgeConfig;
use crate::tools::ProbeOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub streaming: StreamingConfig,
    pub tools: ToolsConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Characters buffered before a delta is emitted
    pub min_chunk_size: usize,
    /// Bounded queue between producer and consumer
    pub channel_capacity: usize,
    /// Grace period before a cancelled producer is aborted
    pub cancel_grace_ms: u64,
    /// Upper bound on a whole session; unset means unbounded
    pub session_timeout_secs: Option<u64>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: constants::streaming::MIN_CHUNK_SIZE,
            channel_capacity: constants::streaming::CHANNEL_CAPACITY,
            cancel_grace_ms: constants::streaming::CANCEL_GRACE.as_millis() as u64,
            session_timeout_secs: None,
        }
    }
}

/// Default for status reads that don't say otherwise
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    #[default]
    Cached,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub probe_timeout_secs: u64,
    pub default_probe_mode: ProbeMode,
    pub call_timeout_secs: u64,
    /// `mcpServers` file; defaults to `~/.warden/mcp.json`
    pub servers_file: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: constants::tools::PROBE_TIMEOUT.as_secs(),
            default_probe_mode: ProbeMode::Cached,
            call_timeout_secs: constants::tools::CALL_TIMEOUT.as_secs(),
            servers_file: None,
        }
    }
}

impl ToolsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Probe options for the configured default mode
    pub fn default_probe_options(&self, include_tools: bool) -> ProbeOptions {
        match self.default_probe_mode {
            ProbeMode::Cached => ProbeOptions::cached(),
            ProbeMode::Full => ProbeOptions::full(include_tools),
        }
    }

    pub fn servers_path(&self) -> PathBuf {
        self.servers_file
            .clone()
            .unwrap_or_else(|| config_dir().join(constants::paths::SERVERS_FILE_NAME))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible API root (the part before `/chat/completions`)
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: constants::generation::DEFAULT_BASE_URL.to_string(),
            model: constants::generation::DEFAULT_MODEL.to_string(),
            api_key_env: constants::generation::API_KEY_ENV.to_string(),
            timeout_secs: constants::generation::TIMEOUT.as_secs(),
            max_retries: constants::generation::MAX_RETRIES,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Key from the configured environment variable, if set and non-empty
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// `~/.warden`
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::paths::CONFIG_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(constants::paths::CONFIG_FILE_NAME)
}

impl WardenConfig {
    /// Load from `path`, or the default location when `None`
    ///
    /// A missing file yields defaults; a malformed or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: WardenConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streaming.min_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "streaming.min_chunk_size must be at least 1".into(),
            ));
        }
        if self.streaming.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "streaming.channel_capacity must be at least 1".into(),
            ));
        }
        if self.streaming.session_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "streaming.session_timeout_secs must be positive when set".into(),
            ));
        }
        if self.tools.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "tools.probe_timeout_secs must be at least 1".into(),
            ));
        }
        if self.tools.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "tools.call_timeout_secs must be at least 1".into(),
            ));
        }
        if self.generation.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "generation.timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            channel_capacity: self.streaming.channel_capacity,
            cancel_grace: Duration::from_millis(self.streaming.cancel_grace_ms),
            session_timeout: self.streaming.session_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_defaults() {
        let config = WardenConfig::parse("").unwrap();
        assert_eq!(config, WardenConfig::default());
        assert_eq!(config.streaming.min_chunk_size, 20);
        assert_eq!(config.tools.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.tools.default_probe_mode, ProbeMode::Cached);
        assert_eq!(config.bridge_config().session_timeout, None);
    }

    #[test]
    fn test_partial_sections() {
        let config = WardenConfig::parse(
            r#"
[streaming]
min_chunk_size = 64
session_timeout_secs = 120

[tools]
default_probe_mode = "full"

[generation]
base_url = "http://localhost:11434/v1"
model = "llama3.1"
temperature = 0.2
"#,
        )
        .unwrap();
        assert_eq!(config.streaming.min_chunk_size, 64);
        assert_eq!(config.streaming.channel_capacity, 32);
        assert_eq!(
            config.bridge_config().session_timeout,
            Some(Duration::from_secs(120))
        );
        assert_eq!(config.tools.default_probe_options(true), ProbeOptions::full(true));
        assert_eq!(config.generation.model, "llama3.1");
        assert_eq!(config.generation.max_retries, 3);
        assert_eq!(config.generation.temperature, Some(0.2));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            WardenConfig::parse("[streaming]\nmin_chunk_size = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WardenConfig::parse("[tools]\nprobe_timeout_secs = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WardenConfig::parse("[streaming]\nchannel_capacity = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            WardenConfig::parse("[streaming\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_and_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(
            WardenConfig::load(Some(&missing)).unwrap(),
            WardenConfig::default()
        );

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[tools]\nprobe_timeout_secs = 5\n").unwrap();
        let config = WardenConfig::load(Some(&path)).unwrap();
        assert_eq!(config.tools.probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_api_key_from_env() {
        let config = GenerationConfig {
            api_key_env: "WARDEN_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert_eq!(config.api_key(), None);
    }
}
