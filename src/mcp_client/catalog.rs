//! Tool catalog: aggregates tool definitions across Ready connections.
//!
//! Provides:
//! - Tool lookup by fully-qualified name (`connection.tool`)
//! - Owner lookup for dispatch
//! - Resolution of unprefixed names when they are unambiguous
//! - Validation that a tool call carries the schema's required arguments

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::errors::McpError;
use super::types::RemoteProcedure;

// ─── ToolCatalog ────────────────────────────────────────────────────────────

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Connection that owns the tool.
    pub connection: String,
    /// The tool as the server described it (its `name` is what goes on the
    /// wire in `tools/call`).
    pub procedure: RemoteProcedure,
}

/// Snapshot of every discovered tool.
///
/// Tool names are stored as `"connection.tool"` (e.g., `"claude.run_task"`).
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, CatalogEntry>,
}

impl ToolCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection's tools.
    ///
    /// Names that already contain a dot are kept as-is; others are prefixed
    /// with the connection name. The first owner of a name keeps it.
    pub fn register_connection_tools(&mut self, connection: &str, tools: Vec<RemoteProcedure>) {
        for procedure in tools {
            let qualified = if procedure.name.contains('.') {
                procedure.name.clone()
            } else {
                format!("{connection}.{}", procedure.name)
            };
            match self.tools.entry(qualified) {
                Entry::Occupied(existing) => {
                    tracing::warn!(
                        tool = %existing.key(),
                        owner = %existing.get().connection,
                        ignored = %connection,
                        "duplicate tool name, keeping first owner"
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(CatalogEntry {
                        connection: connection.to_string(),
                        procedure,
                    });
                }
            }
        }
    }

    /// Look up a tool by its fully-qualified name.
    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.tools.get(name)
    }

    /// Connection that owns a tool.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.tools.get(name).map(|entry| entry.connection.as_str())
    }

    /// All fully-qualified names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Count tools belonging to a connection.
    pub fn tools_for_connection(&self, connection: &str) -> usize {
        self.tools
            .values()
            .filter(|entry| entry.connection == connection)
            .count()
    }

    /// Resolve a name that may be missing its connection prefix.
    ///
    /// Exact names win; an unprefixed name resolves only when exactly one
    /// `*.{name}` exists.
    pub fn resolve(&self, name: &str) -> ToolResolution {
        if self.tools.contains_key(name) {
            return ToolResolution::Exact(name.to_string());
        }

        if !name.contains('.') {
            let suffix = format!(".{name}");
            let mut candidates: Vec<String> = self
                .tools
                .keys()
                .filter(|fq| fq.ends_with(&suffix))
                .cloned()
                .collect();

            if candidates.len() == 1 {
                return ToolResolution::Unprefixed {
                    resolved: candidates.remove(0),
                    original: name.to_string(),
                };
            }
            candidates.sort();
            return ToolResolution::NotFound {
                original: name.to_string(),
                candidates,
            };
        }

        ToolResolution::NotFound {
            original: name.to_string(),
            candidates: Vec::new(),
        }
    }

    /// Validate a tool call: tool exists and required arguments are present.
    ///
    /// Full JSON Schema validation is left to the server.
    pub fn validate_tool_call(
        &self,
        name: &str,
        arguments: &serde_json::Value,
    ) -> Result<&CatalogEntry, McpError> {
        let entry = self.get(name).ok_or(McpError::UnknownTool {
            name: name.to_string(),
        })?;

        if !(arguments.is_object() || arguments.is_null()) {
            return Err(McpError::InvalidArguments {
                tool: name.to_string(),
                reason: "arguments must be a JSON object".into(),
            });
        }

        let args_obj = arguments.as_object();
        for field in entry.procedure.required_arguments() {
            let has_field = args_obj.map(|obj| obj.contains_key(field)).unwrap_or(false);
            if !has_field {
                return Err(McpError::InvalidArguments {
                    tool: name.to_string(),
                    reason: format!("missing required field: '{field}'"),
                });
            }
        }

        Ok(entry)
    }
}

/// Outcome of [`ToolCatalog::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResolution {
    Exact(String),
    /// The caller omitted the connection prefix.
    Unprefixed { resolved: String, original: String },
    /// No tool, or several equally good ones (listed in `candidates`).
    NotFound {
        original: String,
        candidates: Vec<String>,
    },
}

impl ToolResolution {
    /// The resolved tool name, if resolution succeeded.
    pub fn resolved_name(&self) -> Option<&str> {
        match self {
            Self::Exact(name) => Some(name),
            Self::Unprefixed { resolved, .. } => Some(resolved),
            Self::NotFound { .. } => None,
        }
    }
}
