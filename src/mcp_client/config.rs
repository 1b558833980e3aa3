//! Connection configuration and its on-disk list.
//!
//! The list is rewritten in full on every change (temp file + rename), never
//! appended to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::McpError;

/// Current on-disk format version.
const STORE_VERSION: u32 = 1;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Identity and connection recipe for one automation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Unique key within the registry.
    pub name: String,
    /// Which transport to use, and only that transport's fields.
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// The operator intends to use this connection.
    #[serde(default)]
    pub enabled: bool,
    /// Connect at startup (only when also `enabled`).
    #[serde(default)]
    pub auto_connect: bool,
}

impl ConnectionConfig {
    /// A process-backed config with no args, env, or working directory.
    pub fn process(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Process(ProcessCommand {
                command: command.to_string(),
                args: Vec::new(),
                working_dir: None,
                env: BTreeMap::new(),
            }),
            enabled: true,
            auto_connect: false,
        }
    }

    /// A websocket-backed config.
    pub fn socket(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportConfig::Socket {
                url: url.to_string(),
            },
            enabled: true,
            auto_connect: false,
        }
    }

    /// Whether `auto_connect_enabled` should pick this config up.
    pub fn wants_auto_connect(&self) -> bool {
        self.enabled && self.auto_connect
    }
}

/// Transport selection. The tag doubles as the `transportKind` field, so a
/// config can only ever carry the fields of its own kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transportKind", rename_all = "camelCase")]
pub enum TransportConfig {
    Process(ProcessCommand),
    Socket {
        #[serde(default)]
        url: String,
    },
}

impl TransportConfig {
    /// `"process"` or `"socket"`.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Process(_) => "process",
            TransportConfig::Socket { .. } => "socket",
        }
    }
}

/// How to launch a process-backed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCommand {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// ─── Persistence ────────────────────────────────────────────────────────────

/// On-disk format for `connections.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedConnections {
    /// Version for forward compatibility.
    version: u32,
    connections: Vec<ConnectionConfig>,
}

/// Loads and saves the full connection list.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Store backed by a JSON file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store that never touches the disk.
    pub fn in_memory() -> Self {
        Self { path: None }
    }

    /// Default path: platform-standard data directory / `connections.json`.
    pub fn default_path() -> PathBuf {
        crate::data_dir().join("connections.json")
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the connection list. A missing file is an empty list; an
    /// unreadable or unparseable one is logged and treated as empty.
    pub fn load(&self) -> Vec<ConnectionConfig> {
        let Some(path) = self.path.as_deref() else {
            return Vec::new();
        };
        if !path.exists() {
            return Vec::new();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<PersistedConnections>(&content) {
                Ok(persisted) => {
                    tracing::info!(
                        count = persisted.connections.len(),
                        path = %path.display(),
                        "loaded connection configs"
                    );
                    persisted.connections
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %path.display(),
                        "failed to parse connection configs, starting empty"
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "failed to read connection configs, starting empty"
                );
                Vec::new()
            }
        }
    }

    /// Rewrite the full list atomically.
    pub fn save(&self, connections: &[ConnectionConfig]) -> Result<(), McpError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let persistence_error = |reason: String| McpError::Persistence {
            path: path.display().to_string(),
            reason,
        };

        let persisted = PersistedConnections {
            version: STORE_VERSION,
            connections: connections.to_vec(),
        };
        let content = serde_json::to_string_pretty(&persisted)
            .map_err(|e| persistence_error(format!("serialize: {e}")))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| persistence_error(format!("create dir: {e}")))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .map_err(|e| persistence_error(format!("write temp file: {e}")))?;
        std::fs::rename(&tmp_path, path).map_err(|e| persistence_error(format!("rename: {e}")))?;

        tracing::debug!(count = connections.len(), path = %path.display(), "saved connection configs");
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
