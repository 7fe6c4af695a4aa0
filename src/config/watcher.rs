//! Configuration file watcher for hot reload.
//!
//! Reload applies cache TTL, retry policy, operation timeout and tag
//! definitions. Connections, breaker and pool settings require a restart.
//!
//! The directory holding the file is watched, not the file itself. Editors
//! that save through a temporary file and a rename replace the inode, and a
//! watch on the old inode would go quiet after the first save.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::parse_config;
use crate::config::schema::GatewayConfig;

/// Sends a validated [`GatewayConfig`] each time the file's content changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut reload = ReloadState::new(self.path.clone());
        let tx = self.update_tx;

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if reload.concerns(&event) => {
                    if let Some(config) = reload.reload() {
                        let _ = tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, directory = ?directory, "Config watcher started");
        Ok(watcher)
    }
}

/// Remembers the last content handed out so repeated save events for the
/// same bytes produce one reload.
struct ReloadState {
    path: PathBuf,
    last_applied: Option<String>,
}

impl ReloadState {
    fn new(path: PathBuf) -> Self {
        let last_applied = fs::read_to_string(&path).ok();
        Self { path, last_applied }
    }

    fn concerns(&self, event: &Event) -> bool {
        (event.kind.is_modify() || event.kind.is_create())
            && event
                .paths
                .iter()
                .any(|changed| changed.file_name() == self.path.file_name())
    }

    fn reload(&mut self) -> Option<GatewayConfig> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "Config file unreadable, keeping current configuration");
                return None;
            }
        };
        if self.last_applied.as_deref() == Some(content.as_str()) {
            tracing::debug!(path = ?self.path, "Config file content unchanged, skipping reload");
            return None;
        }

        match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = ?self.path, tags = config.tags.len(), "Config file changed, applying reload");
                self.last_applied = Some(content);
                Some(config)
            }
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Rejected config reload, keeping current configuration");
                None
            }
        }
    }
}
