//! Registry entries for named tool connections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{ConnectionConfig, TransportKind};

/// Cached connectivity status of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Never probed since the last configuration change
    Unknown,
    Active,
    Inactive,
    /// Disabled in its configuration; never probed
    Disabled,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Unknown => "unknown",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Inactive => "inactive",
            ConnectionStatus::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tools and resources offered by an active connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub tools: Vec<String>,
    pub resources: Vec<String>,
}

/// Outcome of one probe, applied to an entry
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub catalog: Option<ToolCatalog>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn active(catalog: Option<ToolCatalog>) -> Self {
        Self {
            status: ConnectionStatus::Active,
            error: None,
            catalog,
            checked_at: Utc::now(),
        }
    }

    pub fn inactive(error: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Inactive,
            error: Some(error.into()),
            catalog: None,
            checked_at: Utc::now(),
        }
    }
}

/// State of one named connection
#[derive(Debug, Clone)]
pub struct ToolConnection {
    pub name: String,
    pub config: ConnectionConfig,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    /// Only set by an explicit catalog request
    pub catalog: Option<ToolCatalog>,
    /// Bumped on every configuration change
    pub generation: u64,
}

impl ToolConnection {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Self {
        let mut conn = Self {
            name: name.into(),
            status: ConnectionStatus::Unknown,
            config,
            last_error: None,
            last_checked: None,
            catalog: None,
            generation: 0,
        };
        conn.reset_status();
        conn
    }

    /// Replace the configuration and forget everything learned from probes
    pub fn reconfigure(&mut self, config: ConnectionConfig) {
        self.config = config;
        self.generation += 1;
        self.reset_status();
    }

    fn reset_status(&mut self) {
        self.status = if self.config.disabled {
            ConnectionStatus::Disabled
        } else {
            ConnectionStatus::Unknown
        };
        self.last_error = None;
        self.last_checked = None;
        self.catalog = None;
    }

    /// Apply a probe result unless the configuration changed since it started
    ///
    /// Returns whether the result was applied.
    pub fn record_probe(&mut self, generation: u64, result: ProbeResult) -> bool {
        if generation != self.generation || self.config.disabled {
            return false;
        }
        self.status = result.status;
        self.last_error = result.error;
        self.last_checked = Some(result.checked_at);
        if result.catalog.is_some() || result.status != ConnectionStatus::Active {
            self.catalog = result.catalog;
        }
        true
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            name: self.name.clone(),
            transport: self.config.kind(),
            status: self.status,
            error: self.last_error.clone(),
            last_checked: self.last_checked,
            catalog: self.catalog.clone(),
        }
    }
}

/// Serializable view of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub name: String,
    pub transport: TransportKind,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<ToolCatalog>,
}
