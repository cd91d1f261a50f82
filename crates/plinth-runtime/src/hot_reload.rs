//! Hot reload of plugin directories
//!
//! The watcher observes the plugins root. Changes are grouped per plugin
//! directory and, once the debounce window has passed without further
//! changes, the owning plugin is reloaded (or loaded and started when the
//! directory is new). Lifecycle calls run on the blocking pool.

use crate::error::{Result, RuntimeError};
use crate::manager::PluginLifecycleManager;
use crate::repository::DirectoryRepository;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of one hot reload
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// Plugin id, when the directory held a readable plugin
    pub plugin_id: Option<String>,

    /// Plugin directory that changed
    pub path: PathBuf,

    /// Timestamp of the reload
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Whether the reload succeeded
    pub success: bool,

    /// Error message if the reload failed
    pub error: Option<String>,
}

/// Watches the plugins root and reloads changed plugins
#[derive(Debug)]
pub struct HotReloadWatcher {
    manager: Arc<PluginLifecycleManager>,
    repository: DirectoryRepository,
    debounce: Duration,
    watcher: Option<RecommendedWatcher>,
    rx: Option<mpsc::UnboundedReceiver<notify::Result<Event>>>,
    subscribers: Vec<mpsc::UnboundedSender<ReloadEvent>>,
}

impl HotReloadWatcher {
    /// Create a watcher over `root`
    pub fn new(manager: Arc<PluginLifecycleManager>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            manager,
            repository: DirectoryRepository::new(root),
            debounce: Duration::from_millis(500),
            watcher: None,
            rx: None,
            subscribers: Vec::new(),
        }
    }

    /// Create a watcher from the manager's configuration
    pub fn from_config(manager: Arc<PluginLifecycleManager>) -> Self {
        let root = manager.config().plugins_root.clone();
        let debounce = manager.config().hot_reload.debounce;
        Self::new(manager, root).with_debounce(debounce)
    }

    /// Set the debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Receive a [`ReloadEvent`] after every reload
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ReloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Start watching the plugins root
    pub fn start(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| RuntimeError::watch(format!("cannot create file watcher: {e}")))?;

        watcher
            .watch(self.repository.root(), RecursiveMode::Recursive)
            .map_err(|e| {
                RuntimeError::watch(format!(
                    "cannot watch {}: {e}",
                    self.repository.root().display()
                ))
            })?;

        self.watcher = Some(watcher);
        self.rx = Some(rx);
        info!(root = %self.repository.root().display(), "Hot reload watcher started");
        Ok(())
    }

    /// Stop watching; the event loop ends once pending changes are flushed
    pub fn stop(&mut self) {
        self.watcher = None;
        self.rx = None;
        info!("Hot reload watcher stopped");
    }

    /// Spawn the event loop
    pub fn run(&mut self) -> Result<JoinHandle<()>> {
        let mut rx = self
            .rx
            .take()
            .ok_or_else(|| RuntimeError::watch("watcher not started"))?;
        let manager = Arc::clone(&self.manager);
        let repository = self.repository.clone();
        let subscribers = self.subscribers.clone();
        let debounce = self.debounce;

        Ok(tokio::spawn(async move {
            let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
            let mut deadline: Option<Instant> = None;

            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(Ok(event)) if Self::is_relevant(&event) => {
                            for path in &event.paths {
                                if let Some(dir) = repository.owning_plugin_path(path) {
                                    debug!(path = %path.display(), "Plugin file changed");
                                    pending.insert(dir);
                                }
                            }
                            if !pending.is_empty() {
                                deadline = Some(Instant::now() + debounce);
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => warn!(error = %e, "File watcher error"),
                        None => break,
                    },
                    _ = Self::wait(deadline) => {
                        deadline = None;
                        for dir in std::mem::take(&mut pending) {
                            let event = Self::reload_dir(manager.clone(), dir).await;
                            for subscriber in &subscribers {
                                let _ = subscriber.send(event.clone());
                            }
                        }
                    }
                }
            }

            for dir in pending {
                Self::reload_dir(manager.clone(), dir).await;
            }
        }))
    }

    async fn wait(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    fn is_relevant(event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
    }

    /// Id of the loaded plugin stored in `dir`
    fn plugin_for_dir(manager: &PluginLifecycleManager, dir: &Path) -> Option<String> {
        manager
            .list_plugins()
            .into_iter()
            .find(|info| {
                info.path == dir || info.path.canonicalize().map_or(false, |p| p == dir)
            })
            .map(|info| info.id)
    }

    /// Reload the plugin stored in `dir`, or load and start it if unknown
    pub async fn reload_dir(manager: Arc<PluginLifecycleManager>, dir: PathBuf) -> ReloadEvent {
        let path = dir.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<String> {
            match Self::plugin_for_dir(&manager, &dir) {
                Some(plugin_id) => {
                    info!(plugin = %plugin_id, "Reloading changed plugin");
                    match manager.reload(&plugin_id)? {
                        Some(_) => Ok(plugin_id),
                        None => Err(RuntimeError::not_found(format!(
                            "plugin at {} after reload",
                            dir.display()
                        ))),
                    }
                }
                None => {
                    let plugin_id = manager.load_plugin(&dir)?;
                    info!(plugin = %plugin_id, "Loading new plugin");
                    manager.start(&plugin_id)?;
                    Ok(plugin_id)
                }
            }
        })
        .await
        .unwrap_or_else(|e| Err(RuntimeError::watch(format!("reload task failed: {e}"))));

        match outcome {
            Ok(plugin_id) => ReloadEvent {
                plugin_id: Some(plugin_id),
                path,
                timestamp: chrono::Utc::now(),
                success: true,
                error: None,
            },
            Err(e) => {
                error!(path = %path.display(), error = %e, "Hot reload failed");
                ReloadEvent {
                    plugin_id: None,
                    path,
                    timestamp: chrono::Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::StaticArchiveLoader;
    use crate::config::RuntimeConfig;
    use plinth_api::testing::MockPlugin;
    use plinth_api::{Plugin, PluginArchive, PluginState};
    use std::fs;

    fn manager(root: &Path) -> Arc<PluginLifecycleManager> {
        let archives = StaticArchiveLoader::new().with_archive("demo::Plugin", || {
            PluginArchive::builder()
                .entry("demo::Plugin", || Ok(Box::new(MockPlugin::new()) as Box<dyn Plugin>))
                .build()
        });
        Arc::new(
            PluginLifecycleManager::builder()
                .config(RuntimeConfig {
                    plugins_root: root.to_path_buf(),
                    ..RuntimeConfig::default()
                })
                .archive_loader(Arc::new(archives))
                .build()
                .unwrap(),
        )
    }

    fn write_plugin(root: &Path, id: &str, version: &str) -> PathBuf {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("plugin.toml"),
            format!("id = \"{id}\"\nversion = \"{version}\"\nplugin_class = \"demo::Plugin\"\n"),
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_is_relevant() {
        let modify = Event::new(EventKind::Modify(notify::event::ModifyKind::Data(
            notify::event::DataChange::Content,
        )));
        assert!(HotReloadWatcher::is_relevant(&modify));
        assert!(!HotReloadWatcher::is_relevant(&Event::new(EventKind::Access(
            notify::event::AccessKind::Any
        ))));
    }

    #[tokio::test]
    async fn test_reload_dir_reloads_known_plugin() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_plugin(root.path(), "demo", "0.1.0");
        let manager = manager(root.path());
        manager.load_all().unwrap();
        manager.start_all();

        write_plugin(root.path(), "demo", "0.2.0");
        let event = HotReloadWatcher::reload_dir(manager.clone(), dir).await;

        assert!(event.success, "{:?}", event.error);
        assert_eq!(event.plugin_id.as_deref(), Some("demo"));
        assert_eq!(manager.plugin("demo").unwrap().version, "0.2.0");
        assert_eq!(manager.state("demo").unwrap(), PluginState::Started);
    }

    #[tokio::test]
    async fn test_reload_dir_loads_new_plugin() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        manager.load_all().unwrap();

        let dir = write_plugin(root.path(), "fresh", "1.0.0");
        let event = HotReloadWatcher::reload_dir(manager.clone(), dir).await;
        assert!(event.success);
        assert_eq!(manager.state("fresh").unwrap(), PluginState::Started);
    }

    #[tokio::test]
    async fn test_reload_dir_reports_failure() {
        let root = tempfile::tempdir().unwrap();
        let manager = manager(root.path());
        let dir = root.path().join("empty");
        fs::create_dir_all(&dir).unwrap();

        let event = HotReloadWatcher::reload_dir(manager, dir).await;
        assert!(!event.success);
        assert!(event.error.is_some());
    }

    #[tokio::test]
    async fn test_run_requires_start() {
        let root = tempfile::tempdir().unwrap();
        let mut watcher = HotReloadWatcher::new(manager(root.path()), root.path());
        assert!(watcher.run().is_err());
    }

    #[tokio::test]
    async fn test_run_ends_after_stop() {
        let root = tempfile::tempdir().unwrap();
        write_plugin(root.path(), "demo", "0.1.0");
        let manager = manager(root.path());
        manager.load_all().unwrap();
        manager.start_all();

        let mut watcher = HotReloadWatcher::new(manager.clone(), root.path());
        watcher.start().unwrap();
        let reload_loop = watcher.run().unwrap();
        watcher.stop();

        tokio::time::timeout(Duration::from_secs(5), reload_loop)
            .await
            .expect("reload loop still running after stop")
            .unwrap();
        manager.stop_all();
        assert_eq!(manager.state("demo").unwrap(), PluginState::Stopped);
    }
}
