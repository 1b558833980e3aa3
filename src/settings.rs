//! Client settings shared by every connection.
//!
//! Persisted to `settings.json` in the app data directory. Every field has a
//! default, so a partial file only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// MCP protocol revision announced in `initialize`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

// ─── ClientSettings ─────────────────────────────────────────────────────────

/// Handshake identity and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSettings {
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
    /// Per-call response timeout.
    pub call_timeout_ms: u64,
    /// Bound on transport open + handshake + discovery.
    pub connect_timeout_ms: u64,
    /// Grace period for a child process to exit before it is killed.
    pub shutdown_timeout_ms: u64,
    /// Sent verbatim as `capabilities` in `initialize`.
    pub capabilities: serde_json::Value,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            call_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            shutdown_timeout_ms: 5_000,
            capabilities: serde_json::json!({}),
        }
    }
}

impl ClientSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Params for the `initialize` request.
    pub fn initialize_params(&self) -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": self.protocol_version,
            "capabilities": self.capabilities,
            "clientInfo": {
                "name": self.client_name,
                "version": self.client_version,
            },
        })
    }

    /// Default location: `settings.json` in the app data directory.
    pub fn default_path() -> PathBuf {
        crate::data_dir().join("settings.json")
    }

    /// Load from disk or return defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "loaded client settings");
                    settings
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse client settings, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to read client settings, using defaults");
                Self::default()
            }
        }
    }

    /// Save to disk (atomic write).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;
        tracing::debug!(path = %path.display(), "saved client settings");
        Ok(())
    }
}
