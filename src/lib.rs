pub mod mcp_client;
pub mod settings;

use std::sync::Arc;

use mcp_client::{ConfigStore, ConnectionRegistry, EventKind};
use settings::ClientSettings;

/// Return the platform-standard data directory for Deskpilot.
///
/// - macOS: `~/Library/Application Support/com.deskpilot.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\com.deskpilot.app\`
/// - Linux: `$XDG_DATA_HOME/com.deskpilot.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.deskpilot/` only if none of the above can be resolved.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.deskpilot.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".deskpilot")
}

/// Initialize the tracing subscriber, writing structured logs to the app data directory.
///
/// On each startup:
/// 1. Rotates existing logs (deskpilot.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh deskpilot.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
fn init_tracing() -> anyhow::Result<()> {
    use anyhow::Context;
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = data_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;

    let log_path = log_dir.join("deskpilot.log");

    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("deskpilot=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    // Startup banner: makes it easy to find the right log file
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== Deskpilot starting ==="
    );
    Ok(())
}

/// Rotate log files: `deskpilot.log` → `deskpilot.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &std::path::Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so a
/// crash never loses the last log lines.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Log every registry event until the channel closes.
fn spawn_event_logger(registry: &ConnectionRegistry) -> tokio::task::JoinHandle<()> {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match &event.kind {
                    EventKind::Connected => {
                        tracing::info!(connection = %event.connection, instance = %event.instance, "connected");
                    }
                    EventKind::Disconnected(reason) => {
                        tracing::info!(connection = %event.connection, reason = ?reason, "disconnected");
                    }
                    EventKind::ToolsDiscovered(tools) => {
                        tracing::info!(connection = %event.connection, tools = tools.len(), "tools discovered");
                    }
                    EventKind::Notification(raw) => {
                        tracing::debug!(connection = %event.connection, notification = %raw, "notification");
                    }
                    EventKind::Error(detail) => {
                        tracing::warn!(connection = %event.connection, error = %detail, "connection error");
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Run the host: load settings and connections, auto-connect, and serve
/// until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing first, before any tracing::info!() calls
    init_tracing()?;

    let settings = ClientSettings::load_or_default(&ClientSettings::default_path());
    let store = ConfigStore::new(ConfigStore::default_path());
    let registry = Arc::new(ConnectionRegistry::new(store, settings));
    let logger = spawn_event_logger(&registry);

    let failures = registry.auto_connect_enabled().await;
    let statuses = registry.statuses();
    let ready = statuses
        .iter()
        .filter(|s| s.state == mcp_client::ConnectionState::Ready)
        .count();
    tracing::info!(
        configured = statuses.len(),
        ready,
        failed = failures.len(),
        total_tools = registry.catalog().len(),
        "connection registry initialized"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    registry.shutdown().await;
    logger.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_rotate_log_file_shifts_generations() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("deskpilot.log");
        std::fs::write(&base, "current").unwrap();
        std::fs::write(tmp.path().join("deskpilot.log.1"), "one").unwrap();
        std::fs::write(tmp.path().join("deskpilot.log.3"), "three").unwrap();

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |suffix: &str| {
            std::fs::read_to_string(tmp.path().join(format!("deskpilot.log.{suffix}"))).unwrap()
        };
        assert_eq!(read("1"), "current");
        assert_eq!(read("2"), "one");
        assert!(!tmp.path().join("deskpilot.log.3").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }

    #[test]
    fn test_data_dir_is_app_scoped() {
        let dir = data_dir();
        let leaf = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(leaf == "com.deskpilot.app" || leaf == ".deskpilot");
    }
}
