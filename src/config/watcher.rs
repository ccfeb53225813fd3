//! Configuration hot-reload watcher.
//!
//! ## Responsibility
//! Watch the router's TOML config file for changes and broadcast validated
//! new configs to subscribers. Invalid reloads are logged and rejected; the
//! current config remains unchanged.
//!
//! ## Guarantees
//! - Only validated configs are broadcast
//! - Invalid file edits are logged but do not disrupt routing
//! - File watching is debounced to avoid rapid re-reads on multi-write editors
//! - The background task stops once the watcher is dropped
//!
//! ## NOT Responsible For
//! - Applying the config (see `Router::apply_config`)
//! - Initial config loading (that belongs to `loader`)

use std::path::PathBuf;
use std::sync::mpsc::TryRecvError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, Mutex};

use super::loader::load_from_file;
use super::validation::ConfigError;
use super::RouterConfig;

/// Minimum spacing between two reloads.
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Poll interval for file events.
const POLL: Duration = Duration::from_millis(100);

/// Watches a config file for changes and broadcasts validated updates.
///
/// # Panics
///
/// This type never panics.
pub struct ConfigWatcher {
    tx: broadcast::Sender<RouterConfig>,
    // Dropping this stops file watching.
    _watcher: Arc<Mutex<RecommendedWatcher>>,
}

impl ConfigWatcher {
    /// Start watching `path`.
    ///
    /// Returns the watcher and a receiver for config change notifications.
    /// The initial config is **not** broadcast; use
    /// [`load_from_file`](super::loader::load_from_file) for the initial load.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file watcher cannot be created or
    /// the parent directory cannot be watched.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use agent_router::config::watcher::ConfigWatcher;
    /// use std::path::PathBuf;
    ///
    /// let (watcher, rx) = ConfigWatcher::new(PathBuf::from("router.toml"))?;
    /// router.spawn_config_listener(rx);
    /// ```
    pub fn new(path: PathBuf) -> Result<(Self, broadcast::Receiver<RouterConfig>), ConfigError> {
        let (tx, rx) = broadcast::channel(8);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ConfigError::Io {
            file: path.display().to_string(),
            source: std::io::Error::other(e.to_string()),
        })?;

        // Watch the parent directory so atomic saves (write temp, rename
        // over original) are seen.
        let watch_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Io {
                file: watch_dir.display().to_string(),
                source: std::io::Error::other(e.to_string()),
            })?;

        let tx_task = tx.clone();
        tokio::spawn(async move {
            let mut last_reload = Instant::now().checked_sub(DEBOUNCE).unwrap_or_else(Instant::now);
            let mut pending = false;

            loop {
                tokio::time::sleep(POLL).await;

                loop {
                    match notify_rx.try_recv() {
                        Ok(event) => {
                            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                                && event
                                    .paths
                                    .iter()
                                    .any(|p| p.file_name() == path.file_name())
                            {
                                pending = true;
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            tracing::debug!(path = %path.display(), "config watcher stopped");
                            return;
                        }
                    }
                }

                if !pending || last_reload.elapsed() < DEBOUNCE {
                    continue;
                }
                pending = false;
                last_reload = Instant::now();

                match load_from_file(&path) {
                    Ok(new_config) => {
                        tracing::info!(
                            path = %path.display(),
                            catalog_entries = new_config.catalog_entries.len(),
                            budget_scopes = new_config.budget_limits.len(),
                            "config reloaded successfully"
                        );
                        // No receivers is fine; the config was still validated.
                        let _ = tx_task.send(new_config);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "config reload rejected, keeping current config"
                        );
                    }
                }
            }
        });

        Ok((
            Self {
                tx,
                _watcher: Arc::new(Mutex::new(watcher)),
            },
            rx,
        ))
    }

    /// Subscribe to config change notifications.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn subscribe(&self) -> broadcast::Receiver<RouterConfig> {
        self.tx.subscribe()
    }
}
