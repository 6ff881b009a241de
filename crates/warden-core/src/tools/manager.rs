//! Tool Connectivity Manager - registry of named tool connections
//!
//! Two read paths with very different costs:
//! - cached reads return the last known status without touching the network
//! - probes open a session, ping it (and optionally list its catalog), bounded
//!   by a per-connection timeout
//!
//! Registry mutations never probe. Probe failures are recorded on the entry,
//! never returned as errors.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants;
use crate::error::ToolError;

use super::config::{parse_servers_document, servers_document, ConnectionConfig};
use super::connection::{
    ConnectionSnapshot, ConnectionStatus, ProbeResult, ToolCatalog, ToolConnection,
};
use super::transport::{ToolConnector, ToolSession};

/// How a status read should be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Return the cached status instead of probing
    pub skip_health_check: bool,
    /// Also fetch the tool catalog (only meaningful when probing)
    pub include_tools: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::cached()
    }
}

impl ProbeOptions {
    pub fn cached() -> Self {
        Self {
            skip_health_check: true,
            include_tools: false,
        }
    }

    pub fn full(include_tools: bool) -> Self {
        Self {
            skip_health_check: false,
            include_tools,
        }
    }
}

/// Outcome of an `mcpServers` import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: Vec<String>,
    /// Names that already existed
    pub skipped: Vec<String>,
    /// Entries that failed validation, with the reason
    pub invalid: Vec<(String, String)>,
}

/// One registry slot
///
/// `state` is only ever held for short synchronous sections; `probe_lock`
/// serializes probes of the same entry across awaits.
struct ConnectionEntry {
    state: RwLock<ToolConnection>,
    probe_lock: tokio::sync::Mutex<()>,
}

impl ConnectionEntry {
    fn new(connection: ToolConnection) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(connection),
            probe_lock: tokio::sync::Mutex::new(()),
        })
    }
}

/// Registry of named tool connections, shared across sessions
pub struct ToolConnectivityManager {
    entries: DashMap<String, Arc<ConnectionEntry>>,
    connector: Arc<dyn ToolConnector>,
    probe_timeout: Duration,
    call_timeout: Duration,
}

impl ToolConnectivityManager {
    pub fn new(connector: Arc<dyn ToolConnector>) -> Self {
        Self {
            entries: DashMap::new(),
            connector,
            probe_timeout: constants::tools::PROBE_TIMEOUT,
            call_timeout: constants::tools::CALL_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, probe_timeout: Duration, call_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self.call_timeout = call_timeout;
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register a new connection. Status starts as `unknown`; nothing is probed.
    pub fn add(&self, name: &str, config: ConnectionConfig) -> Result<(), ToolError> {
        validate_name(name)?;
        config.validate()?;
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ToolError::AlreadyExists(name.to_string())),
            Entry::Vacant(slot) => {
                info!(connection = %name, "Added tool connection ({})", config.describe());
                slot.insert(ConnectionEntry::new(ToolConnection::new(name, config)));
                Ok(())
            }
        }
    }

    /// Replace (or insert) a connection's configuration, resetting its status
    pub fn update(&self, name: &str, config: ConnectionConfig) -> Result<(), ToolError> {
        validate_name(name)?;
        config.validate()?;
        let description = config.describe();
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(slot) => {
                slot.get().state.write().reconfigure(config);
            }
            Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry::new(ToolConnection::new(name, config)));
            }
        }
        info!(connection = %name, "Updated tool connection ({})", description);
        Ok(())
    }

    /// Delete a connection
    pub fn remove(&self, name: &str) -> Result<(), ToolError> {
        match self.entries.remove(name) {
            Some((_, entry)) => {
                // Invalidate probes still running against the removed entry
                entry.state.write().generation += 1;
                info!(connection = %name, "Removed tool connection");
                Ok(())
            }
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn config(&self, name: &str) -> Option<ConnectionConfig> {
        let entry = self.entry(name).ok()?;
        let config = entry.state.read().config.clone();
        Some(config)
    }

    fn entry(&self, name: &str) -> Result<Arc<ConnectionEntry>, ToolError> {
        self.entries
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    fn all_entries(&self) -> Vec<Arc<ConnectionEntry>> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    // =========================================================================
    // Status reads
    // =========================================================================

    /// Last known status, without network activity
    pub fn cached_status(&self, name: &str) -> Result<ConnectionSnapshot, ToolError> {
        Ok(self.entry(name)?.state.read().snapshot())
    }

    /// Last known status of every connection, sorted by name
    pub fn cached_statuses(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshots: Vec<ConnectionSnapshot> = self
            .all_entries()
            .iter()
            .map(|e| e.state.read().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Status of one connection, cached or probed per `options`
    pub async fn status(
        &self,
        name: &str,
        options: ProbeOptions,
    ) -> Result<ConnectionSnapshot, ToolError> {
        if options.skip_health_check {
            return self.cached_status(name);
        }
        let entry = self.entry(name)?;
        Ok(self.probe_entry(&entry, options.include_tools).await)
    }

    /// Status of every connection; probes run concurrently, each time-bounded
    pub async fn statuses(&self, options: ProbeOptions) -> Vec<ConnectionSnapshot> {
        if options.skip_health_check {
            return self.cached_statuses();
        }

        let entries = self.all_entries();
        let started = Instant::now();
        let mut probes: FuturesUnordered<_> = entries
            .iter()
            .map(|entry| self.probe_entry(entry, options.include_tools))
            .collect();

        let mut snapshots = Vec::with_capacity(entries.len());
        while let Some(snapshot) = probes.next().await {
            debug!(
                connection = %snapshot.name,
                status = %snapshot.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Probe finished"
            );
            snapshots.push(snapshot);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Fetch tools and resources of one connection
    pub async fn catalog(&self, name: &str) -> Result<ToolCatalog, ToolError> {
        let entry = self.entry(name)?;
        if entry.state.read().config.disabled {
            return Err(ToolError::Disabled(name.to_string()));
        }
        let snapshot = self.probe_entry(&entry, true).await;
        match snapshot.catalog {
            Some(catalog) => Ok(catalog),
            None => Err(ToolError::Connect(
                snapshot
                    .error
                    .unwrap_or_else(|| format!("'{}' is not reachable", name)),
            )),
        }
    }

    /// Probe one entry under a single deadline covering the wait for an
    /// in-flight probe, connect, handshake and ping
    async fn probe_entry(&self, entry: &ConnectionEntry, include_tools: bool) -> ConnectionSnapshot {
        let started = Instant::now();
        let requested_at = Utc::now();
        let deadline = tokio::time::Instant::now() + self.probe_timeout;

        let _probing = match entry.probe_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => match tokio::time::timeout_at(deadline, entry.probe_lock.lock()).await {
                Ok(guard) => {
                    // A probe that finished while we waited answers for us too
                    let state = entry.state.read();
                    if answers_request(&state, requested_at, include_tools) {
                        return state.snapshot();
                    }
                    drop(state);
                    guard
                }
                Err(_) => {
                    let (name, generation) = {
                        let state = entry.state.read();
                        (state.name.clone(), state.generation)
                    };
                    let result = ProbeResult::inactive(self.probe_timeout_message());
                    return self.record(entry, &name, generation, result, started);
                }
            },
        };

        let (name, config, generation) = {
            let state = entry.state.read();
            if state.config.disabled {
                return state.snapshot();
            }
            (state.name.clone(), state.config.clone(), state.generation)
        };

        let probe = self.run_probe(&name, &config, include_tools);
        let result = match tokio::time::timeout_at(deadline, probe).await {
            Ok(Ok(catalog)) => ProbeResult::active(catalog),
            Ok(Err(e)) => ProbeResult::inactive(e.to_string()),
            Err(_) => ProbeResult::inactive(self.probe_timeout_message()),
        };
        self.record(entry, &name, generation, result, started)
    }

    fn probe_timeout_message(&self) -> String {
        format!("probe timed out after {}ms", self.probe_timeout.as_millis())
    }

    fn record(
        &self,
        entry: &ConnectionEntry,
        name: &str,
        generation: u64,
        result: ProbeResult,
        started: Instant,
    ) -> ConnectionSnapshot {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result.error {
            None => info!(connection = %name, elapsed_ms, "Tool connection active"),
            Some(error) => warn!(connection = %name, elapsed_ms, "Tool connection inactive: {}", error),
        }

        let mut state = entry.state.write();
        if !state.record_probe(generation, result) {
            debug!(connection = %name, "Discarding probe result for changed configuration");
        }
        state.snapshot()
    }

    async fn run_probe(
        &self,
        name: &str,
        config: &ConnectionConfig,
        include_tools: bool,
    ) -> Result<Option<ToolCatalog>, ToolError> {
        let session = self.connector.connect(name, config).await?;
        let mut session = OpenSession::new(name, session, self.probe_timeout);
        let outcome = match session.live() {
            Ok(live) => probe_session(live, include_tools).await,
            Err(e) => Err(e),
        };
        session.close().await;
        outcome
    }

    // =========================================================================
    // Invocation
    // =========================================================================

    /// Invoke `tool` on a connection and return the server's result object
    ///
    /// Connecting and closing are each bounded by the probe timeout, the call
    /// itself by the call timeout. The outcome refreshes the cached status.
    /// Dropping the returned future mid-call still releases the session.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let entry = self.entry(name)?;
        let (config, generation) = {
            let state = entry.state.read();
            if state.config.disabled {
                return Err(ToolError::Disabled(name.to_string()));
            }
            (state.config.clone(), state.generation)
        };

        let connect = tokio::time::timeout(self.probe_timeout, self.connector.connect(name, &config));
        let session = match connect.await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                entry
                    .state
                    .write()
                    .record_probe(generation, ProbeResult::inactive(e.to_string()));
                return Err(e);
            }
            Err(_) => {
                let err = ToolError::Timeout(self.probe_timeout);
                entry
                    .state
                    .write()
                    .record_probe(generation, ProbeResult::inactive(err.to_string()));
                return Err(err);
            }
        };

        let mut session = OpenSession::new(name, session, self.probe_timeout);
        debug!(connection = %name, tool, "Calling tool");
        let call = match session.live() {
            Ok(live) => {
                tokio::time::timeout(self.call_timeout, live.call_tool(tool, arguments)).await
            }
            Err(e) => Ok(Err(e)),
        };
        session.close().await;

        match call {
            Ok(Ok(result)) => {
                entry
                    .state
                    .write()
                    .record_probe(generation, ProbeResult::active(None));
                Ok(result)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ToolError::Timeout(self.call_timeout)),
        }
    }

    // =========================================================================
    // Import / export
    // =========================================================================

    /// Add every valid entry of an `mcpServers` document, skipping existing names
    ///
    /// Entries are added in descending `priority` order, so `imported` lists
    /// them the same way.
    pub fn import_json(&self, document: &Value) -> Result<ImportReport, ToolError> {
        let parsed = parse_servers_document(document)?;
        let mut report = ImportReport {
            invalid: parsed.invalid,
            ..Default::default()
        };

        // Higher priority loads first, ties by name
        let mut ordered: Vec<(String, ConnectionConfig)> = parsed.valid.into_iter().collect();
        ordered.sort_by_key(|(_, config)| std::cmp::Reverse(config.priority));

        for (name, config) in ordered {
            match self.add(&name, config) {
                Ok(()) => report.imported.push(name),
                Err(ToolError::AlreadyExists(_)) => {
                    warn!(connection = %name, "Connection already exists, skipping");
                    report.skipped.push(name);
                }
                Err(e) => report.invalid.push((name, e.to_string())),
            }
        }
        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            invalid = report.invalid.len(),
            "Imported tool connections"
        );
        Ok(report)
    }

    /// All connections as an `mcpServers` document
    pub fn export_json(&self) -> Result<Value, ToolError> {
        let mut configs: Vec<(String, ConnectionConfig)> = Vec::with_capacity(self.len());
        for entry in self.all_entries() {
            let state = entry.state.read();
            configs.push((state.name.clone(), state.config.clone()));
        }
        configs.sort_by(|a, b| a.0.cmp(&b.0));
        servers_document(configs.iter().map(|(name, config)| (name.as_str(), config)))
    }

    /// Import a servers file; a missing file imports nothing
    pub fn load_file(&self, path: &Path) -> Result<ImportReport, ToolError> {
        if !path.exists() {
            debug!("No servers file at {:?}", path);
            return Ok(ImportReport::default());
        }
        let content = std::fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&content)?;
        self.import_json(&document)
    }

    /// Write all connections to a servers file
    pub fn save_file(&self, path: &Path) -> Result<(), ToolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let document = self.export_json()?;
        std::fs::write(path, serde_json::to_string_pretty(&document)?)?;
        info!("Saved {} tool connections to {:?}", self.len(), path);
        Ok(())
    }
}

/// Whether a probe recorded after `requested_at` can stand in for a new one
fn answers_request(
    state: &ToolConnection,
    requested_at: DateTime<Utc>,
    include_tools: bool,
) -> bool {
    let fresh = state.last_checked.is_some_and(|checked| checked >= requested_at);
    let complete =
        !include_tools || state.catalog.is_some() || state.status != ConnectionStatus::Active;
    fresh && complete
}

/// A connected session that is always released
///
/// `close` releases it in place with a bounded wait. If the owning future
/// is dropped first (cancellation, an outer timeout), the release is
/// handed to the runtime instead.
struct OpenSession {
    name: String,
    session: Option<Box<dyn ToolSession>>,
    close_timeout: Duration,
}

impl OpenSession {
    fn new(name: &str, session: Box<dyn ToolSession>, close_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            session: Some(session),
            close_timeout,
        }
    }

    fn live(&mut self) -> Result<&mut (dyn ToolSession + 'static), ToolError> {
        let name = &self.name;
        self.session
            .as_deref_mut()
            .ok_or_else(|| ToolError::Protocol(format!("session with '{}' already closed", name)))
    }

    async fn close(mut self) {
        if let Some(session) = self.session.take() {
            release(&self.name, session, self.close_timeout).await;
        }
    }
}

impl Drop for OpenSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(connection = %self.name, "Releasing abandoned tool session");
                let name = std::mem::take(&mut self.name);
                let close_timeout = self.close_timeout;
                handle.spawn(async move { release(&name, session, close_timeout).await });
            }
            Err(_) => debug!(connection = %self.name, "No runtime to release tool session"),
        }
    }
}

async fn release(name: &str, mut session: Box<dyn ToolSession>, close_timeout: Duration) {
    if tokio::time::timeout(close_timeout, session.close())
        .await
        .is_err()
    {
        warn!(connection = %name, "Closing tool session timed out after {:?}", close_timeout);
    }
}

fn validate_name(name: &str) -> Result<(), ToolError> {
    if name.trim().is_empty() {
        return Err(ToolError::InvalidConfig("connection name is empty".into()));
    }
    Ok(())
}

async fn probe_session(
    session: &mut dyn ToolSession,
    include_tools: bool,
) -> Result<Option<ToolCatalog>, ToolError> {
    session.ping().await?;
    if !include_tools {
        return Ok(None);
    }
    let tools = session.list_tools().await?;
    let resources = session.list_resources().await?;
    Ok(Some(ToolCatalog { tools, resources }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeBehavior, FakeConnector};
    use serde_json::json;

    fn manager(connector: Arc<FakeConnector>) -> ToolConnectivityManager {
        ToolConnectivityManager::new(connector)
            .with_timeouts(Duration::from_millis(300), Duration::from_secs(2))
    }

    fn http(name: &str) -> ConnectionConfig {
        ConnectionConfig::streamable_http(format!("http://{}.test/mcp", name))
    }

    #[tokio::test]
    async fn test_add_does_not_probe() {
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(connector.clone());
        manager.add("scanner", http("scanner")).unwrap();

        let snapshot = manager.cached_status("scanner").unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Unknown);
        assert_eq!(connector.connects(), 0);

        assert!(matches!(
            manager.add("scanner", http("scanner")),
            Err(ToolError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_cached_reads_are_deterministic() {
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(connector.clone());
        manager.add("scanner", http("scanner")).unwrap();
        manager
            .status("scanner", ProbeOptions::full(false))
            .await
            .unwrap();

        let first = manager.status("scanner", ProbeOptions::cached()).await.unwrap();
        let second = manager.status("scanner", ProbeOptions::cached()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.status, ConnectionStatus::Active);
        assert!(first.last_checked.is_some());
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_connection_goes_inactive_within_timeout() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("dead", FakeBehavior::Hang);
        let manager = manager(connector);
        manager.add("dead", http("dead")).unwrap();

        let started = Instant::now();
        let snapshot = manager.status("dead", ProbeOptions::full(false)).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(snapshot.status, ConnectionStatus::Inactive);
        assert!(snapshot.error.unwrap().contains("timed out"));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(1300));
    }

    #[tokio::test]
    async fn test_concurrent_status_checks_share_one_deadline() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("dead", FakeBehavior::Hang);
        let manager = Arc::new(manager(connector.clone()));
        manager.add("dead", http("dead")).unwrap();

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.status("dead", ProbeOptions::full(false)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let second = manager.status("dead", ProbeOptions::full(false)).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(second.status, ConnectionStatus::Inactive);
        assert!(elapsed < Duration::from_millis(450), "took {:?}", elapsed);
        first.await.unwrap().unwrap();
        // The waiting probe reused the in-flight result
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_is_data_not_error() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("refusing", FakeBehavior::Refuse);
        let manager = manager(connector);
        manager.add("refusing", http("refusing")).unwrap();

        let snapshot = manager.status("refusing", ProbeOptions::full(false)).await.unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Inactive);
        assert!(snapshot.error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn test_batch_probe_isolation() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("dead", FakeBehavior::Hang);
        connector.set("slow", FakeBehavior::Slow(Duration::from_millis(100)));
        let manager = manager(connector.clone());
        for name in ["alpha", "beta", "dead", "slow"] {
            manager.add(name, http(name)).unwrap();
        }

        let started = Instant::now();
        let snapshots = manager.statuses(ProbeOptions::full(false)).await;
        let elapsed = started.elapsed();

        let names: Vec<&str> = snapshots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "dead", "slow"]);
        for snapshot in &snapshots {
            let expected = if snapshot.name == "dead" {
                ConnectionStatus::Inactive
            } else {
                ConnectionStatus::Active
            };
            assert_eq!(snapshot.status, expected, "{}", snapshot.name);
        }
        // Concurrent: bounded by the single timeout, not the sum
        assert!(elapsed < Duration::from_millis(900));

        // The healthy ones finished long before the dead one timed out
        let finished = connector.finished_at();
        assert!(finished["alpha"] < Duration::from_millis(150));
        assert!(finished["slow"] < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_update_resets_status_and_discards_in_flight_probe() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("scanner", FakeBehavior::Slow(Duration::from_millis(150)));
        let manager = Arc::new(manager(connector.clone()));
        manager.add("scanner", http("scanner")).unwrap();

        let probing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.status("scanner", ProbeOptions::full(false)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.update("scanner", http("scanner-v2")).unwrap();
        probing.await.unwrap().unwrap();

        let snapshot = manager.cached_status("scanner").unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Unknown);
        assert!(snapshot.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_disabled_connection_is_never_probed() {
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(connector.clone());
        manager
            .add("off", http("off").with_disabled(true))
            .unwrap();

        let snapshots = manager.statuses(ProbeOptions::full(true)).await;
        assert_eq!(snapshots[0].status, ConnectionStatus::Disabled);
        assert_eq!(connector.connects(), 0);
        assert!(matches!(
            manager.call_tool("off", "scan", json!({})).await,
            Err(ToolError::Disabled(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_only_when_requested() {
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(connector);
        manager.add("scanner", http("scanner")).unwrap();

        let plain = manager.status("scanner", ProbeOptions::full(false)).await.unwrap();
        assert!(plain.catalog.is_none());

        let catalog = manager.catalog("scanner").await.unwrap();
        assert_eq!(catalog.tools, vec!["scan_host", "lookup_cve"]);
        let cached = manager.cached_status("scanner").unwrap();
        assert_eq!(cached.catalog, Some(catalog));
    }

    #[tokio::test]
    async fn test_call_tool_refreshes_status() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("down", FakeBehavior::Refuse);
        let manager = manager(connector);
        manager.add("scanner", http("scanner")).unwrap();
        manager.add("down", http("down")).unwrap();

        let result = manager
            .call_tool("scanner", "scan_host", json!({"target": "10.0.0.1"}))
            .await
            .unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(
            manager.cached_status("scanner").unwrap().status,
            ConnectionStatus::Active
        );

        assert!(manager.call_tool("down", "scan_host", json!({})).await.is_err());
        assert_eq!(
            manager.cached_status("down").unwrap().status,
            ConnectionStatus::Inactive
        );

        assert!(matches!(
            manager.call_tool("missing", "scan_host", json!({})).await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_server_cannot_hold_a_call() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("stuck", FakeBehavior::Stalled);
        let manager = ToolConnectivityManager::new(connector.clone())
            .with_timeouts(Duration::from_millis(300), Duration::from_millis(200));
        manager.add("stuck", http("stuck")).unwrap();

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            manager.call_tool("stuck", "scan_host", json!({})),
        )
        .await
        .expect("call_tool outlived its call and close bounds");

        assert!(matches!(result, Err(ToolError::Timeout(_))));
        // call timeout + close timeout
        assert!(started.elapsed() < Duration::from_millis(900));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_call_releases_session() {
        let connector = Arc::new(FakeConnector::new());
        connector.set("scanner", FakeBehavior::CallHangs);
        let manager = manager(connector.clone());
        manager.add("scanner", http("scanner")).unwrap();

        let call = manager.call_tool("scanner", "scan_host", json!({}));
        assert!(tokio::time::timeout(Duration::from_millis(100), call)
            .await
            .is_err());
        assert_eq!(connector.calls(), 1);

        for _ in 0..50 {
            if connector.closes() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let manager = manager(Arc::new(FakeConnector::new()));
        manager.add("scanner", http("scanner")).unwrap();
        manager.remove("scanner").unwrap();
        assert!(!manager.contains("scanner"));
        assert!(matches!(manager.remove("scanner"), Err(ToolError::NotFound(_))));
        assert!(matches!(
            manager.cached_status("scanner"),
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_import_skips_existing_and_reports_invalid() {
        let manager = manager(Arc::new(FakeConnector::new()));
        manager.add("existing", http("existing")).unwrap();

        let report = manager
            .import_json(&json!({
                "mcpServers": {
                    "existing": { "url": "http://other.test/mcp" },
                    "fs": { "command": "npx", "args": ["-y", "server-fs"] },
                    "broken": { "headers": {} }
                }
            }))
            .unwrap();
        assert_eq!(report.imported, vec!["fs"]);
        assert_eq!(report.skipped, vec!["existing"]);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(manager.names(), vec!["existing", "fs"]);
        // Existing entry untouched
        assert_eq!(manager.config("existing").unwrap(), http("existing"));
    }

    #[tokio::test]
    async fn test_import_orders_by_priority() {
        let manager = manager(Arc::new(FakeConnector::new()));
        let report = manager
            .import_json(&json!({
                "mcpServers": {
                    "alpha": { "url": "http://alpha.test/mcp" },
                    "backup": { "url": "http://backup.test/mcp", "priority": -1 },
                    "primary": { "command": "nmap-mcp", "priority": 10 },
                    "zeta": { "url": "http://zeta.test/mcp" }
                }
            }))
            .unwrap();
        assert_eq!(report.imported, vec!["primary", "alpha", "zeta", "backup"]);
        assert_eq!(manager.config("primary").unwrap().priority, 10);
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mcp.json");

        let manager = manager(Arc::new(FakeConnector::new()));
        manager.add("scanner", http("scanner").with_api_key("k")).unwrap();
        manager
            .add("fs", ConnectionConfig::stdio("npx", vec!["server-fs".into()]))
            .unwrap();
        manager.save_file(&path).unwrap();

        let restored = ToolConnectivityManager::new(Arc::new(FakeConnector::new()));
        let report = restored.load_file(&path).unwrap();
        assert_eq!(report.imported, vec!["fs", "scanner"]);
        assert_eq!(restored.config("scanner"), manager.config("scanner"));

        let missing = restored.load_file(&dir.path().join("absent.json")).unwrap();
        assert!(missing.imported.is_empty());
    }
}
