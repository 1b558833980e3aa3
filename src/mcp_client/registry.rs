//! Connection registry: named configs and the live connections built from them.
//!
//! Provides:
//! - Config CRUD with the full list persisted on every change
//! - At most one live connection per name, with construct-or-reuse made
//!   atomic by a per-name async lock
//! - Best-effort bulk auto-connect
//! - Status snapshots, the cross-connection tool catalog, and tool dispatch
//!
//! The registry is an explicit object owned by the host; nothing here is
//! global. Call [`ConnectionRegistry::shutdown`] before dropping it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::catalog::ToolCatalog;
use super::config::{ConfigStore, ConnectionConfig, TransportConfig};
use super::errors::McpError;
use super::events::{self, Event};
use super::lifecycle::{Connection, ConnectionState};
use super::transport::{ProcessTransport, SocketTransport, Transport};
use crate::settings::ClientSettings;

// ─── Transport construction ─────────────────────────────────────────────────

/// Builds the transport for a config.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        config: &ConnectionConfig,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn Transport>, McpError>;
}

/// Process configs get a [`ProcessTransport`], socket configs a
/// [`SocketTransport`].
#[derive(Debug, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(
        &self,
        config: &ConnectionConfig,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn Transport>, McpError> {
        let transport: Arc<dyn Transport> = match &config.transport {
            TransportConfig::Process(command) => Arc::new(ProcessTransport::new(
                &config.name,
                command.clone(),
                settings.shutdown_timeout(),
            )),
            TransportConfig::Socket { url } => Arc::new(SocketTransport::new(
                &config.name,
                url,
                settings.connect_timeout(),
            )),
        };
        Ok(transport)
    }
}

// ─── Status ─────────────────────────────────────────────────────────────────

/// Per-config status exposed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub name: String,
    pub transport_kind: String,
    pub enabled: bool,
    pub state: ConnectionState,
    pub tool_count: u32,
    pub last_check: String,
    pub error: Option<String>,
}

/// Most recent connect failure for a name.
#[derive(Debug, Clone)]
struct FailureRecord {
    at: DateTime<Utc>,
    error: String,
}

// ─── ConnectionRegistry ─────────────────────────────────────────────────────

/// Owns every connection config and live connection.
pub struct ConnectionRegistry {
    store: ConfigStore,
    settings: ClientSettings,
    factory: Arc<dyn TransportFactory>,
    configs: StdMutex<Vec<ConnectionConfig>>,
    live: StdMutex<HashMap<String, Arc<Connection>>>,
    name_locks: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    failures: StdMutex<HashMap<String, FailureRecord>>,
    events: broadcast::Sender<Event>,
}

impl ConnectionRegistry {
    /// Load configs from `store` and build transports with the default factory.
    pub fn new(store: ConfigStore, settings: ClientSettings) -> Self {
        Self::with_factory(store, settings, Arc::new(DefaultTransportFactory))
    }

    /// Like [`new`](Self::new) with a custom transport factory.
    pub fn with_factory(
        store: ConfigStore,
        settings: ClientSettings,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let configs = store.load();
        Self {
            store,
            settings,
            factory,
            configs: StdMutex::new(configs),
            live: StdMutex::new(HashMap::new()),
            name_locks: StdMutex::new(HashMap::new()),
            failures: StdMutex::new(HashMap::new()),
            events: events::channel(),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Receive every connection's events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    // ─── Configs ─────────────────────────────────────────────────────────

    /// All configs, in insertion order.
    pub fn configs(&self) -> Vec<ConnectionConfig> {
        self.configs.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn config(&self, name: &str) -> Option<ConnectionConfig> {
        self.configs
            .lock()
            .ok()
            .and_then(|c| c.iter().find(|cfg| cfg.name == name).cloned())
    }

    /// Insert or replace a config by name and persist the full list.
    ///
    /// A live connection for the name keeps its old config until it is
    /// reconnected.
    pub fn upsert(&self, config: ConnectionConfig) -> Result<(), McpError> {
        if config.name.trim().is_empty() {
            return Err(McpError::Config {
                name: config.name,
                reason: "connection name must not be empty".into(),
            });
        }

        let mut configs = self.lock_configs()?;
        let mut updated = configs.clone();
        match updated.iter_mut().find(|c| c.name == config.name) {
            Some(existing) => *existing = config.clone(),
            None => updated.push(config.clone()),
        }
        self.store.save(&updated)?;
        *configs = updated;

        tracing::info!(
            connection = %config.name,
            transport = config.transport.kind(),
            enabled = config.enabled,
            "connection config saved"
        );
        Ok(())
    }

    /// Disconnect and discard any live connection, then delete the config
    /// and persist.
    pub async fn remove(&self, name: &str) -> Result<(), McpError> {
        if self.config(name).is_none() {
            return Err(McpError::NotFound {
                name: name.to_string(),
            });
        }

        self.disconnect(name).await;

        let mut configs = self.lock_configs()?;
        let updated: Vec<ConnectionConfig> =
            configs.iter().filter(|c| c.name != name).cloned().collect();
        self.store.save(&updated)?;
        *configs = updated;
        drop(configs);

        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(name);
        }
        tracing::info!(connection = %name, "connection config removed");
        Ok(())
    }

    // ─── Connections ─────────────────────────────────────────────────────

    /// Return the live Ready connection for `name`, connecting if needed.
    ///
    /// Concurrent callers for the same name wait for the in-flight attempt
    /// and then share its connection (or retry if it failed).
    pub async fn connect(&self, name: &str) -> Result<Arc<Connection>, McpError> {
        if self.config(name).is_none() {
            return Err(McpError::NotFound {
                name: name.to_string(),
            });
        }

        let lock = self.name_lock(name);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get(name) {
            if existing.is_ready() {
                return Ok(existing);
            }
            tracing::info!(
                connection = %name,
                state = %existing.state(),
                "replacing stale connection"
            );
            self.take_live(name);
        }

        // Re-read under the lock: the config may have been removed or edited.
        let config = self.config(name).ok_or_else(|| McpError::NotFound {
            name: name.to_string(),
        })?;

        let transport = self.factory.create(&config, &self.settings)?;
        let connection = Connection::new(
            config,
            transport,
            self.settings.clone(),
            self.events.clone(),
        );

        match connection.connect().await {
            Ok(()) => {
                if let Ok(mut live) = self.live.lock() {
                    live.insert(name.to_string(), Arc::clone(&connection));
                }
                if let Ok(mut failures) = self.failures.lock() {
                    failures.remove(name);
                }
                Ok(connection)
            }
            Err(e) => {
                if let Ok(mut failures) = self.failures.lock() {
                    failures.insert(
                        name.to_string(),
                        FailureRecord {
                            at: Utc::now(),
                            error: e.to_string(),
                        },
                    );
                }
                Err(e)
            }
        }
    }

    /// The live connection for `name`, whatever its state.
    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.live.lock().ok().and_then(|live| live.get(name).cloned())
    }

    /// Disconnect `name`. A no-op when nothing is live.
    pub async fn disconnect(&self, name: &str) {
        let lock = self.name_lock(name);
        let _guard = lock.lock().await;
        if let Some(connection) = self.take_live(name) {
            connection.disconnect().await;
        }
    }

    /// Disconnect every live connection.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self
            .live
            .lock()
            .map(|live| live.keys().cloned().collect())
            .unwrap_or_default();
        futures::future::join_all(names.iter().map(|name| self.disconnect(name))).await;
    }

    /// Connect every config that is both enabled and marked auto-connect.
    ///
    /// Attempts run concurrently; one failure never stops the others.
    /// Returns the failures (partial startup is OK).
    pub async fn auto_connect_enabled(&self) -> Vec<(String, McpError)> {
        let names: Vec<String> = self
            .configs()
            .into_iter()
            .filter(ConnectionConfig::wants_auto_connect)
            .map(|c| c.name)
            .collect();

        let outcomes =
            futures::future::join_all(names.iter().map(|name| self.connect(name))).await;

        let mut errors = Vec::new();
        for (name, outcome) in names.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(
                    connection = %name,
                    error = %e,
                    "auto-connect failed (non-fatal)"
                );
                errors.push((name, e));
            }
        }
        errors
    }

    /// Disconnect everything. Call before dropping the registry.
    pub async fn shutdown(&self) {
        let count = self.live.lock().map(|l| l.len()).unwrap_or(0);
        tracing::info!(connections = count, "shutting down connection registry");
        self.disconnect_all().await;
    }

    // ─── Views ───────────────────────────────────────────────────────────

    /// One status line per config, sorted by name.
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let now = Utc::now();
        let failures = self
            .failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();

        let mut statuses: Vec<ConnectionStatus> = self
            .configs()
            .into_iter()
            .map(|config| {
                let live = self.get(&config.name);
                let failure = failures.get(&config.name);
                let (state, tool_count) = match (&live, failure) {
                    (Some(conn), _) => (conn.state(), conn.tools().len() as u32),
                    (None, Some(_)) => (ConnectionState::Errored, 0),
                    (None, None) => (ConnectionState::Idle, 0),
                };
                let last_check = match (&live, failure) {
                    (None, Some(f)) => f.at,
                    _ => now,
                };

                ConnectionStatus {
                    transport_kind: config.transport.kind().to_string(),
                    enabled: config.enabled,
                    state,
                    tool_count,
                    last_check: last_check.to_rfc3339(),
                    error: if live.is_some() {
                        None
                    } else {
                        failure.map(|f| f.error.clone())
                    },
                    name: config.name,
                }
            })
            .collect();

        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Snapshot of every Ready connection's tools.
    pub fn catalog(&self) -> ToolCatalog {
        let mut connections: Vec<Arc<Connection>> = self
            .live
            .lock()
            .map(|live| live.values().cloned().collect())
            .unwrap_or_default();
        connections.sort_by(|a, b| a.name().cmp(b.name()));

        let mut catalog = ToolCatalog::new();
        for connection in connections.iter().filter(|c| c.is_ready()) {
            catalog.register_connection_tools(connection.name(), connection.tools());
        }
        catalog
    }

    /// Route a tool call to the connection that owns the tool.
    ///
    /// Accepts fully-qualified names and unambiguous unprefixed ones.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let catalog = self.catalog();
        let resolved = catalog
            .resolve(name)
            .resolved_name()
            .map(str::to_string)
            .ok_or_else(|| McpError::UnknownTool {
                name: name.to_string(),
            })?;
        let entry = catalog.validate_tool_call(&resolved, &arguments)?;

        let connection = self
            .get(&entry.connection)
            .ok_or_else(|| McpError::NotConnected {
                name: entry.connection.clone(),
            })?;
        connection
            .call_tool(&entry.procedure.name, arguments)
            .await
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn lock_configs(&self) -> Result<std::sync::MutexGuard<'_, Vec<ConnectionConfig>>, McpError> {
        self.configs.lock().map_err(|_| McpError::Persistence {
            path: self
                .store
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            reason: "config list lock poisoned".into(),
        })
    }

    fn name_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.name_locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(name.to_string()).or_default()),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn take_live(&self, name: &str) -> Option<Arc<Connection>> {
        self.live.lock().ok().and_then(|mut live| live.remove(name))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::events::EventKind;
    use crate::mcp_client::test_support::{Reply, ScriptedTransport};
    use crate::mcp_client::transport::CloseReason;
    use crate::mcp_client::types::JsonRpcError;
    use serde_json::json;
    use tempfile::TempDir;

    type MakeTransport = dyn Fn(&ConnectionConfig) -> Arc<ScriptedTransport> + Send + Sync;

    /// Factory handing out scripted transports and remembering each one.
    struct ScriptedFactory {
        make: Box<MakeTransport>,
        created: StdMutex<Vec<Arc<ScriptedTransport>>>,
    }

    impl ScriptedFactory {
        fn new<F>(make: F) -> Arc<Self>
        where
            F: Fn(&ConnectionConfig) -> Arc<ScriptedTransport> + Send + Sync + 'static,
        {
            Arc::new(Self {
                make: Box::new(make),
                created: StdMutex::new(Vec::new()),
            })
        }

        fn created(&self) -> Vec<Arc<ScriptedTransport>> {
            self.created.lock().unwrap().clone()
        }
    }

    impl TransportFactory for ScriptedFactory {
        fn create(
            &self,
            config: &ConnectionConfig,
            _settings: &ClientSettings,
        ) -> Result<Arc<dyn Transport>, McpError> {
            let transport = (self.make)(config);
            self.created.lock().unwrap().push(Arc::clone(&transport));
            Ok(transport)
        }
    }

    fn tools(names: &[&str]) -> serde_json::Value {
        let tools: Vec<serde_json::Value> = names
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "inputSchema": {"type": "object", "required": ["text"]}
                })
            })
            .collect();
        json!(tools)
    }

    fn rejecting_server() -> Arc<ScriptedTransport> {
        ScriptedTransport::new(|_, _| {
            Reply::Error(JsonRpcError {
                code: -32603,
                message: "boom".into(),
                data: None,
            })
        })
    }

    fn auto(mut config: ConnectionConfig) -> ConnectionConfig {
        config.auto_connect = true;
        config
    }

    fn registry(factory: &Arc<ScriptedFactory>, configs: &[ConnectionConfig]) -> ConnectionRegistry {
        let registry = ConnectionRegistry::with_factory(
            ConfigStore::in_memory(),
            ClientSettings::default(),
            Arc::clone(factory) as Arc<dyn TransportFactory>,
        );
        for config in configs {
            registry.upsert(config.clone()).unwrap();
        }
        registry
    }

    #[test]
    fn test_default_factory_picks_transport_by_kind() {
        use crate::mcp_client::codec::Framing;

        let settings = ClientSettings::default();
        let process = DefaultTransportFactory
            .create(&ConnectionConfig::process("p", "srv --stdio"), &settings)
            .unwrap();
        assert_eq!(process.framing(), Framing::LineDelimited);
        assert_eq!(process.describe(), "srv --stdio");

        let socket = DefaultTransportFactory
            .create(&ConnectionConfig::socket("s", "ws://localhost:9"), &settings)
            .unwrap();
        assert_eq!(socket.framing(), Framing::MessagePerFrame);
        assert_eq!(socket.describe(), "ws://localhost:9");
    }

    #[tokio::test]
    async fn test_upsert_persists_full_list() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("connections.json");
        let factory = ScriptedFactory::new(|_| ScriptedTransport::silent());

        let registry = ConnectionRegistry::with_factory(
            ConfigStore::new(&path),
            ClientSettings::default(),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
        );
        registry.upsert(ConnectionConfig::process("a", "one")).unwrap();
        registry.upsert(ConnectionConfig::socket("b", "ws://localhost:1")).unwrap();
        registry.upsert(ConnectionConfig::process("a", "two")).unwrap();

        let reloaded = ConfigStore::new(&path).load();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded, registry.configs());
        match &reloaded[0].transport {
            TransportConfig::Process(cmd) => assert_eq!(cmd.command, "two"),
            other => panic!("expected process config, got {other:?}"),
        }

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["version"], 1);

        registry.remove("b").await.unwrap();
        assert_eq!(ConfigStore::new(&path).load().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_name() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::silent());
        let registry = registry(&factory, &[]);
        let err = registry.upsert(ConnectionConfig::process(" ", "x")).unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
        assert!(registry.configs().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_names_are_not_found() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::silent());
        let registry = registry(&factory, &[]);
        assert!(matches!(
            registry.connect("ghost").await.unwrap_err(),
            McpError::NotFound { .. }
        ));
        assert!(matches!(
            registry.remove("ghost").await.unwrap_err(),
            McpError::NotFound { .. }
        ));
        // Disconnecting something that is not live is a no-op.
        registry.disconnect("ghost").await;
        assert!(factory.created().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_connect_constructs_once() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(&factory, &[ConnectionConfig::process("x", "srv")]);

        let (first, second) = tokio::join!(registry.connect("x"), registry.connect("x"));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created().len(), 1);
        assert_eq!(factory.created()[0].open_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_reuses_ready_connection() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(&factory, &[ConnectionConfig::process("x", "srv")]);

        let first = registry.connect("x").await.unwrap();
        let again = registry.connect("x").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_stored_and_retry_is_clean() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let factory = ScriptedFactory::new(move |_| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                rejecting_server()
            } else {
                ScriptedTransport::server(tools(&["echo"]))
            }
        });
        let registry = registry(&factory, &[ConnectionConfig::process("x", "srv")]);

        let err = registry.connect("x").await.unwrap_err();
        assert!(matches!(err, McpError::InitFailed { .. }));
        assert!(registry.get("x").is_none());
        let status = &registry.statuses()[0];
        assert_eq!(status.state, ConnectionState::Errored);
        assert!(status.error.as_deref().unwrap().contains("boom"));

        let connection = registry.connect("x").await.unwrap();
        assert!(connection.is_ready());
        assert_eq!(factory.created().len(), 2);
        assert!(registry.statuses()[0].error.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect_gets_fresh_connection() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(&factory, &[ConnectionConfig::process("x", "srv")]);

        let first = registry.connect("x").await.unwrap();
        registry.disconnect("x").await;
        assert_eq!(first.state(), ConnectionState::Closed);
        assert!(registry.get("x").is_none());

        let second = registry.connect("x").await.unwrap();
        assert_ne!(first.instance_id(), second.instance_id());

        let created = factory.created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].sent_requests()[0]["id"], 1);
    }

    #[tokio::test]
    async fn test_remote_closed_connection_is_replaced() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(&factory, &[ConnectionConfig::process("x", "srv")]);
        let mut events = registry.subscribe();

        let first = registry.connect("x").await.unwrap();
        factory.created()[0].hang_up(CloseReason::ProcessExited { exit_code: Some(1) });
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event.kind, EventKind::Disconnected(_)) {
                break;
            }
        }
        assert_eq!(registry.statuses()[0].state, ConnectionState::Closed);

        let second = registry.connect("x").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_ready());
    }

    #[tokio::test]
    async fn test_remove_disconnects_live_connection() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(&factory, &[ConnectionConfig::process("x", "srv")]);

        let connection = registry.connect("x").await.unwrap();
        registry.remove("x").await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(registry.configs().is_empty());
        assert!(registry.get("x").is_none());
    }

    #[tokio::test]
    async fn test_auto_connect_is_best_effort() {
        let factory = ScriptedFactory::new(|config| match config.name.as_str() {
            "bad" => rejecting_server(),
            _ => ScriptedTransport::server(tools(&["echo"])),
        });
        let mut disabled = auto(ConnectionConfig::process("disabled", "srv"));
        disabled.enabled = false;
        let registry = registry(
            &factory,
            &[
                auto(ConnectionConfig::process("good", "srv")),
                auto(ConnectionConfig::process("bad", "srv")),
                ConnectionConfig::process("manual", "srv"),
                disabled,
            ],
        );

        let failures = registry.auto_connect_enabled().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
        assert!(registry.get("good").unwrap().is_ready());
        assert!(registry.get("manual").is_none());
        assert!(registry.get("disabled").is_none());
        assert_eq!(factory.created().len(), 2);
    }

    #[tokio::test]
    async fn test_catalog_duplicate_dotted_name_owned_by_first_connection() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["ui.click"])));
        let registry = registry(
            &factory,
            &[
                ConnectionConfig::process("zeta", "srv"),
                ConnectionConfig::process("alpha", "srv"),
            ],
        );
        registry.connect("zeta").await.unwrap();
        registry.connect("alpha").await.unwrap();

        for _ in 0..5 {
            assert_eq!(registry.catalog().owner("ui.click"), Some("alpha"));
        }
    }

    #[tokio::test]
    async fn test_catalog_and_call_tool_routing() {
        let factory = ScriptedFactory::new(|config| match config.name.as_str() {
            "a" => ScriptedTransport::server(tools(&["echo", "shared"])),
            _ => ScriptedTransport::server(tools(&["shared"])),
        });
        let registry = registry(
            &factory,
            &[
                ConnectionConfig::process("a", "srv"),
                ConnectionConfig::process("b", "srv"),
            ],
        );
        registry.connect("a").await.unwrap();
        registry.connect("b").await.unwrap();

        let catalog = registry.catalog();
        assert_eq!(catalog.tool_names(), vec!["a.echo", "a.shared", "b.shared"]);

        let result = registry
            .call_tool("echo", json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(result["content"][0]["text"].as_str().unwrap().contains("hello"));
        let sent = factory.created()[0].sent().last().cloned().unwrap();
        assert_eq!(sent["params"]["name"], "echo");

        assert!(matches!(
            registry.call_tool("shared", json!({"text": "x"})).await,
            Err(McpError::UnknownTool { .. })
        ));
        assert!(matches!(
            registry.call_tool("b.shared", json!({})).await,
            Err(McpError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn test_statuses_reflect_connections() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(
            &factory,
            &[
                ConnectionConfig::process("b", "srv"),
                ConnectionConfig::socket("a", "ws://localhost:1"),
            ],
        );
        registry.connect("b").await.unwrap();

        let statuses = registry.statuses();
        assert_eq!(statuses[0].name, "a");
        assert_eq!(statuses[0].state, ConnectionState::Idle);
        assert_eq!(statuses[0].transport_kind, "socket");
        assert_eq!(statuses[1].state, ConnectionState::Ready);
        assert_eq!(statuses[1].tool_count, 1);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_everything() {
        let factory = ScriptedFactory::new(|_| ScriptedTransport::server(tools(&["echo"])));
        let registry = registry(
            &factory,
            &[
                auto(ConnectionConfig::process("a", "srv")),
                auto(ConnectionConfig::process("b", "srv")),
            ],
        );
        assert!(registry.auto_connect_enabled().await.is_empty());

        registry.shutdown().await;
        assert!(registry.get("a").is_none());
        assert!(registry.get("b").is_none());
        for transport in factory.created() {
            assert_eq!(transport.close_count(), 1);
        }
    }
}
