//! Application constants and configuration defaults
//!
//! Centralized location for magic numbers and default values

use std::time::Duration;

/// Streaming pipeline configuration
pub mod streaming {
    use super::*;

    /// Minimum characters buffered before a delta chunk is emitted
    pub const MIN_CHUNK_SIZE: usize = 20;

    /// Capacity of the producer -> consumer event queue
    pub const CHANNEL_CAPACITY: usize = 32;

    /// How long a cancelled producer may take to wind down before it is aborted
    pub const CANCEL_GRACE: Duration = Duration::from_millis(250);

    /// Agent name used for events synthesized by the pipeline itself
    pub const PIPELINE_AGENT: &str = "StreamPipeline";
}

/// Tool connection configuration
pub mod tools {
    use super::*;

    /// Bound for a single connectivity probe (connect + handshake + ping)
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

    /// Bound for a single tool invocation
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(120);

    /// Bound for releasing a session (HTTP session DELETE, child shutdown)
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Protocol revision announced during the initialize handshake
    pub const PROTOCOL_VERSION: &str = "2024-11-05";

    /// Client name announced during the initialize handshake
    pub const CLIENT_NAME: &str = "warden";
}

/// Text generation configuration
pub mod generation {
    use super::*;

    /// Overall request timeout for one generation call
    pub const TIMEOUT: Duration = Duration::from_secs(60);

    /// Retries for transient failures before the first fragment
    pub const MAX_RETRIES: u32 = 3;

    /// Default OpenAI-compatible endpoint
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

    /// Default model ID
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

    /// Environment variable holding the API key
    pub const API_KEY_ENV: &str = "WARDEN_API_KEY";

    /// Connection timeout for HTTP requests
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Filesystem locations
pub mod paths {
    /// Config directory name (under the home directory)
    pub const CONFIG_DIR_NAME: &str = ".warden";

    /// Main configuration file
    pub const CONFIG_FILE_NAME: &str = "config.toml";

    /// Tool server registry file (standard `mcpServers` JSON)
    pub const SERVERS_FILE_NAME: &str = "mcp.json";
}
