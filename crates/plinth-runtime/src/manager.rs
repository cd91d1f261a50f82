//! Plugin lifecycle manager
//!
//! The manager owns one [`PluginRecord`] per loaded plugin and drives it
//! through `CREATED -> RESOLVED -> {DISABLED, STARTED} -> STOPPED`, with
//! `FAILED` reached when a start attempt fails. Starting a plugin runs, in
//! order: module container creation, extension registration, the entry
//! point's start hook, route binding and event subscription. Stopping and
//! failed starts unwind through the same teardown path.
//!
//! Plugin faults never escape batch operations: they are logged, stored as a
//! [`StartingError`] and reflected in the plugin's state. Unknown plugin ids
//! are caller bugs and fail with [`RuntimeError::NotFound`].
//!
//! Lifecycle mutations are serialized by a reentrant lock. Read paths
//! ([`PluginLifecycleManager::lookup`], [`PluginLifecycleManager::container`]
//! and the query methods) never take it.

use crate::archive::{ArchiveLoader, StaticArchiveLoader};
use crate::bridge::{EventBridge, RouteBridge};
use crate::config::RuntimeConfig;
use crate::container::{ModuleContainer, ModuleContainerRegistry};
use crate::dependency::DependencyResolver;
use crate::descriptor::{DescriptorFinder, ManifestDescriptorFinder};
use crate::discovery::{Classifier, ExtensionDescriptor, ExtensionDiscoveryEngine, MarkerClassifier};
use crate::error::{Result, RuntimeError};
use crate::extension::{ExtensionList, ExtensionPointCache};
use crate::host::{EventBus, InProcessHost, RootContainer, RouteRegistry};
use crate::loader::{CodeLoader, LoaderRegistry, SharedResourcePolicy, SharedScope};
use crate::repository::{DirectoryRepository, PluginRepository};
use crate::status::PluginStatusProvider;
use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use plinth_api::error::guard;
use plinth_api::event::BatchOperation;
use plinth_api::{
    ComponentContainer, Event, EventDispatcher, LifecycleEvent, Plugin, PluginContext,
    PluginDescriptor, PluginState, RouteBinding, RouteTable, StartingError,
};
use semver::VersionReq;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type Transitions = Vec<LifecycleEvent>;

/// Runtime record of a loaded plugin
struct PluginRecord {
    descriptor: Arc<PluginDescriptor>,
    state: PluginState,
    entry: Option<Box<dyn Plugin>>,
    start_index: Option<u64>,
}

impl PluginRecord {
    fn new(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            state: PluginState::Created,
            entry: None,
            start_index: None,
        }
    }
}

#[derive(Default)]
struct PluginTable {
    order: Vec<String>,
    records: HashMap<String, PluginRecord>,
}

/// Read-only view of a loaded plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    /// Plugin id
    pub id: String,
    /// Plugin version
    pub version: String,
    /// Description
    pub description: String,
    /// Provider
    pub provider: Option<String>,
    /// License
    pub license: Option<String>,
    /// Entry point class
    pub plugin_class: String,
    /// Declared dependencies, as written in the manifest
    pub dependencies: Vec<String>,
    /// Current state
    pub state: PluginState,
    /// Last recorded failure
    pub starting_error: Option<StartingError>,
    /// Position in the start sequence while started
    pub start_order: Option<u64>,
    /// Plugin directory
    pub path: PathBuf,
}

/// Loads, starts, stops, reloads and unloads plugins
pub struct PluginLifecycleManager {
    config: RuntimeConfig,
    repository: Arc<dyn PluginRepository>,
    finder: Arc<dyn DescriptorFinder>,
    archives: Arc<dyn ArchiveLoader>,
    status: PluginStatusProvider,
    loaders: LoaderRegistry,
    containers: ModuleContainerRegistry,
    engine: Arc<ExtensionDiscoveryEngine>,
    cache: ExtensionPointCache,
    routes: RouteBridge,
    events: EventBridge,
    table: RwLock<PluginTable>,
    starting_errors: DashMap<String, StartingError>,
    resolver: RwLock<DependencyResolver>,
    start_counter: AtomicU64,
    lifecycle: ReentrantMutex<()>,
}

impl PluginLifecycleManager {
    /// Start building a manager
    pub fn builder() -> PluginLifecycleManagerBuilder {
        PluginLifecycleManagerBuilder::default()
    }

    // ---- Lifecycle -------------------------------------------------------

    /// Discover every plugin in the repository and resolve the dependency graph
    ///
    /// Unreadable manifests and duplicate ids are logged and skipped. A
    /// dependency cycle fails the call and leaves no plugin from it loaded.
    pub fn load_all(&self) -> Result<Vec<String>> {
        let _lifecycle = self.lifecycle.lock();
        let mut transitions = Transitions::new();
        let result = self.load_all_inner(&mut transitions);
        self.publish(transitions);
        result
    }

    /// Load the plugin stored at `path`
    pub fn load_plugin(&self, path: impl AsRef<Path>) -> Result<String> {
        let _lifecycle = self.lifecycle.lock();
        let mut transitions = Transitions::new();
        let result = self.load_plugin_inner(path.as_ref(), &mut transitions);
        self.publish(transitions);
        result
    }

    /// Start every resolved, enabled plugin in dependency order
    ///
    /// Failures are recorded per plugin and never abort the pass.
    pub fn start_all(&self) {
        let _lifecycle = self.lifecycle.lock();
        let mut transitions = Transitions::new();
        self.start_all_inner(&mut transitions);
        transitions.push(LifecycleEvent::LifecycleBatchChanged {
            operation: BatchOperation::StartAll,
        });
        self.publish(transitions);
    }

    /// Start one plugin (and its required dependencies)
    ///
    /// A disabled plugin is enabled first; a started plugin is left alone.
    /// Start failures are recorded and reported through the returned state.
    pub fn start(&self, plugin_id: &str) -> Result<PluginState> {
        let _lifecycle = self.lifecycle.lock();
        let mut transitions = Transitions::new();
        let result = self.start_one(plugin_id, &mut transitions);
        self.publish(transitions);
        result
    }

    /// Stop one plugin, optionally stopping its dependents first
    pub fn stop(&self, plugin_id: &str, stop_dependents: bool) -> Result<PluginState> {
        let _lifecycle = self.lifecycle.lock();
        self.require(plugin_id)?;
        let mut transitions = Transitions::new();
        if stop_dependents {
            self.stop_dependents(plugin_id, &mut transitions);
        }
        let state = self.stop_inner(plugin_id, &mut transitions);
        self.publish(transitions);
        Ok(state)
    }

    /// Stop every started plugin, most recently started first
    pub fn stop_all(&self) {
        let _lifecycle = self.lifecycle.lock();
        let mut transitions = Transitions::new();
        self.stop_all_inner(&mut transitions);
        transitions.push(LifecycleEvent::LifecycleBatchChanged {
            operation: BatchOperation::StopAll,
        });
        self.publish(transitions);
    }

    /// Stop and forget a plugin, optionally unloading its dependents first
    pub fn unload(&self, plugin_id: &str, unload_dependents: bool) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.require(plugin_id)?;
        let mut transitions = Transitions::new();
        let result = self.unload_inner(plugin_id, unload_dependents, &mut transitions);
        self.publish(transitions);
        result
    }

    /// Stop, unload, rediscover and start a plugin
    ///
    /// Returns `None` when the plugin cannot be rediscovered at its path.
    pub fn reload(&self, plugin_id: &str) -> Result<Option<PluginState>> {
        let _lifecycle = self.lifecycle.lock();
        let path = self.require(plugin_id)?.path.clone();
        let mut transitions = Transitions::new();

        self.stop_inner(plugin_id, &mut transitions);
        self.unload_inner(plugin_id, false, &mut transitions)?;

        let result = match self.load_plugin_inner(&path, &mut transitions) {
            Ok(id) => self.start_one(&id, &mut transitions).map(Some),
            Err(e) => {
                error!(plugin = %plugin_id, path = %path.display(), error = %e, "Reload failed");
                Ok(None)
            }
        };
        self.publish(transitions);
        result
    }

    /// Stop and unload everything, rediscover, then start again
    ///
    /// With `restart_started_only`, only plugins that were started before
    /// the reload are started again.
    pub fn reload_all(&self, restart_started_only: bool) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let mut transitions = Transitions::new();
        let previously_started: HashSet<String> = self.started_plugins().into_iter().collect();

        self.stop_all_inner(&mut transitions);
        let loaded: Vec<String> = self.table.read().order.iter().rev().cloned().collect();
        for plugin_id in &loaded {
            if let Err(e) = self.unload_inner(plugin_id, false, &mut transitions) {
                warn!(plugin = %plugin_id, error = %e, "Unload during reload failed");
            }
        }

        let result = self.load_all_inner(&mut transitions).map(|_| {
            if restart_started_only {
                let order = self.table.read().order.clone();
                for plugin_id in order.iter().filter(|id| previously_started.contains(*id)) {
                    self.start_inner(plugin_id, &mut transitions);
                }
            } else {
                self.start_all_inner(&mut transitions);
            }
        });

        transitions.push(LifecycleEvent::LifecycleBatchChanged {
            operation: BatchOperation::ReloadAll,
        });
        self.publish(transitions);
        result
    }

    /// Enable a plugin; a disabled plugin becomes resolved again
    pub fn enable(&self, plugin_id: &str) -> Result<PluginState> {
        let _lifecycle = self.lifecycle.lock();
        self.require(plugin_id)?;
        let mut transitions = Transitions::new();
        self.status.enable(plugin_id);
        if self.state_of(plugin_id) == Some(PluginState::Disabled) {
            self.set_state(plugin_id, PluginState::Resolved, &mut transitions);
        }
        self.publish(transitions);
        self.state(plugin_id)
    }

    /// Disable a plugin, stopping it first when started
    pub fn disable(&self, plugin_id: &str) -> Result<PluginState> {
        let _lifecycle = self.lifecycle.lock();
        self.require(plugin_id)?;
        let mut transitions = Transitions::new();
        self.stop_inner(plugin_id, &mut transitions);
        self.status.disable(plugin_id);
        if self.state_of(plugin_id) != Some(PluginState::Created) {
            self.set_state(plugin_id, PluginState::Disabled, &mut transitions);
        }
        self.publish(transitions);
        self.state(plugin_id)
    }

    // ---- Queries ---------------------------------------------------------

    /// Every loaded plugin, dependencies first
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|id| table.records.get(id))
            .map(|record| self.info(record))
            .collect()
    }

    /// One loaded plugin
    pub fn plugin(&self, plugin_id: &str) -> Result<PluginInfo> {
        let table = self.table.read();
        table
            .records
            .get(plugin_id)
            .map(|record| self.info(record))
            .ok_or_else(|| RuntimeError::not_found(format!("plugin '{plugin_id}'")))
    }

    /// Current state of a plugin
    pub fn state(&self, plugin_id: &str) -> Result<PluginState> {
        self.state_of(plugin_id)
            .ok_or_else(|| RuntimeError::not_found(format!("plugin '{plugin_id}'")))
    }

    /// Last failure recorded for a plugin
    pub fn starting_error(&self, plugin_id: &str) -> Option<StartingError> {
        self.starting_errors.get(plugin_id).map(|e| e.value().clone())
    }

    /// Every recorded failure, by plugin id
    pub fn starting_errors(&self) -> Vec<StartingError> {
        let mut errors: Vec<_> = self.starting_errors.iter().map(|e| e.value().clone()).collect();
        errors.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        errors
    }

    /// Started plugins in start order
    pub fn started_plugins(&self) -> Vec<String> {
        let table = self.table.read();
        let mut started: Vec<_> = table
            .records
            .iter()
            .filter(|(_, r)| r.state.is_started())
            .map(|(id, r)| (r.start_index.unwrap_or(u64::MAX), id.clone()))
            .collect();
        started.sort();
        started.into_iter().map(|(_, id)| id).collect()
    }

    /// Implementations of extension point `E` across started plugins
    pub fn lookup<E: ?Sized + Send + Sync + 'static>(&self) -> ExtensionList<E> {
        self.cache.lookup::<E>()
    }

    /// Implementations of extension point `E` from one plugin
    pub fn lookup_in<E: ?Sized + Send + Sync + 'static>(&self, plugin_id: &str) -> ExtensionList<E> {
        self.cache.lookup_in::<E>(plugin_id)
    }

    /// Repository paths that hold no loaded plugin
    pub fn describe_unloaded(&self) -> Result<Vec<PathBuf>> {
        let loaded: HashSet<PathBuf> = self
            .table
            .read()
            .records
            .values()
            .map(|r| r.descriptor.path.clone())
            .collect();
        Ok(self
            .repository
            .plugin_paths()?
            .into_iter()
            .filter(|path| !loaded.contains(path))
            .collect())
    }

    /// Module container of a started plugin
    pub fn container(&self, plugin_id: &str) -> Result<Arc<ModuleContainer>> {
        self.containers.get(plugin_id)
    }

    /// Code loader of a resolved plugin
    pub fn loader(&self, plugin_id: &str) -> Result<Arc<CodeLoader>> {
        self.loaders.get(plugin_id)
    }

    /// Route table entries produced for a plugin
    pub fn route_bindings(&self, plugin_id: &str) -> Vec<RouteBinding> {
        self.routes.bindings(plugin_id)
    }

    /// Extensions registered by a plugin
    pub fn extensions(&self, plugin_id: &str) -> Vec<ExtensionDescriptor> {
        self.engine.owned_by(plugin_id)
    }

    /// Loaded plugins depending directly on `plugin_id`
    pub fn dependents(&self, plugin_id: &str) -> Vec<String> {
        self.resolver.read().dependents(plugin_id)
    }

    /// Every loaded plugin depending on `plugin_id`, directly or not, nearest first
    pub fn transitive_dependents(&self, plugin_id: &str) -> Vec<String> {
        self.resolver.read().transitive_dependents(plugin_id)
    }

    /// Loaded plugins `plugin_id` depends on directly
    pub fn dependencies(&self, plugin_id: &str) -> Vec<String> {
        self.resolver.read().dependencies(plugin_id)
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Host symbols and resources shared with every plugin
    pub fn shared_scope(&self) -> &Arc<SharedScope> {
        self.loaders.shared()
    }

    /// Host root container
    pub fn root_container(&self) -> &Arc<dyn ComponentContainer> {
        self.containers.root()
    }

    /// Plugin repository
    pub fn repository(&self) -> &Arc<dyn PluginRepository> {
        &self.repository
    }

    // ---- Internals -------------------------------------------------------

    fn info(&self, record: &PluginRecord) -> PluginInfo {
        let descriptor = &record.descriptor;
        PluginInfo {
            id: descriptor.id.clone(),
            version: descriptor.version.clone(),
            description: descriptor.description.clone(),
            provider: descriptor.provider.clone(),
            license: descriptor.license.clone(),
            plugin_class: descriptor.plugin_class.clone(),
            dependencies: descriptor.dependencies.iter().map(|d| d.to_string()).collect(),
            state: record.state,
            starting_error: self.starting_error(&descriptor.id),
            start_order: record.start_index.filter(|_| record.state.is_started()),
            path: descriptor.path.clone(),
        }
    }

    fn require(&self, plugin_id: &str) -> Result<Arc<PluginDescriptor>> {
        self.table
            .read()
            .records
            .get(plugin_id)
            .map(|r| r.descriptor.clone())
            .ok_or_else(|| RuntimeError::not_found(format!("plugin '{plugin_id}'")))
    }

    fn state_of(&self, plugin_id: &str) -> Option<PluginState> {
        self.table.read().records.get(plugin_id).map(|r| r.state)
    }

    fn set_state(&self, plugin_id: &str, state: PluginState, transitions: &mut Transitions) {
        let old_state = {
            let mut table = self.table.write();
            let Some(record) = table.records.get_mut(plugin_id) else {
                return;
            };
            std::mem::replace(&mut record.state, state)
        };

        if old_state != state {
            info!(plugin = %plugin_id, from = %old_state, to = %state, "Plugin state changed");
            transitions.push(LifecycleEvent::PluginStateChanged {
                plugin_id: plugin_id.to_string(),
                old_state,
                new_state: state,
            });
        }
    }

    fn record_failure(&self, plugin_id: &str, failure: &RuntimeError) {
        error!(plugin = %plugin_id, error = %failure, "Plugin failure recorded");
        self.starting_errors.insert(
            plugin_id.to_string(),
            StartingError::from_error(plugin_id, failure),
        );
    }

    fn publish(&self, transitions: Transitions) {
        for event in transitions {
            self.events.dispatcher().publish(Event::new(event));
        }
    }

    fn load_all_inner(&self, transitions: &mut Transitions) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for path in self.repository.plugin_paths()? {
            if !self.finder.is_applicable(&path) {
                debug!(path = %path.display(), "No plugin manifest, skipping");
                continue;
            }
            match self.finder.find(&path).and_then(|d| self.insert_record(d)) {
                Ok(id) => added.push(id),
                Err(e) => error!(path = %path.display(), error = %e, "Cannot load plugin"),
            }
        }

        if let Err(e) = self.resolve_plugins(transitions) {
            self.discard(&added);
            return Err(e);
        }
        info!(loaded = added.len(), "Loaded plugins");
        Ok(added)
    }

    fn load_plugin_inner(&self, path: &Path, transitions: &mut Transitions) -> Result<String> {
        let plugin_id = self.insert_record(self.finder.find(path)?)?;
        if let Err(e) = self.resolve_plugins(transitions) {
            self.discard(std::slice::from_ref(&plugin_id));
            return Err(e);
        }
        info!(plugin = %plugin_id, path = %path.display(), "Loaded plugin");
        Ok(plugin_id)
    }

    fn insert_record(&self, descriptor: PluginDescriptor) -> Result<String> {
        let mut table = self.table.write();
        if table.records.contains_key(&descriptor.id) {
            return Err(RuntimeError::already_exists(format!("plugin '{}'", descriptor.id)));
        }
        let id = descriptor.id.clone();
        debug!(plugin = %id, version = %descriptor.version, "Created plugin record");
        table.order.push(id.clone());
        table.records.insert(id.clone(), PluginRecord::new(descriptor));
        Ok(id)
    }

    fn discard(&self, plugin_ids: &[String]) {
        let mut table = self.table.write();
        for id in plugin_ids {
            table.records.remove(id);
            table.order.retain(|o| o != id);
            self.loaders.remove(id);
            self.starting_errors.remove(id);
        }
    }

    /// Rebuild the graph and resolve every CREATED record that can be
    fn resolve_plugins(&self, transitions: &mut Transitions) -> Result<()> {
        let descriptors: Vec<PluginDescriptor> = {
            let table = self.table.read();
            table
                .order
                .iter()
                .filter_map(|id| table.records.get(id))
                .map(|r| (*r.descriptor).clone())
                .collect()
        };

        let resolution = self.resolver.write().resolve(&descriptors)?;
        self.table.write().order = resolution.sorted.clone();

        let system_version = self.config.system_version();
        for descriptor in &descriptors {
            if self.state_of(&descriptor.id) != Some(PluginState::Created) {
                continue;
            }

            let mut problems = resolution.problems(&descriptor.id);
            if let (Some(requires), Some(system)) = (&descriptor.requires, &system_version) {
                if let Ok(req) = VersionReq::parse(requires) {
                    if !req.matches(system) {
                        problems.push(format!("requires host {requires}, running {system}"));
                    }
                }
            }
            if !problems.is_empty() {
                let message = problems.join("; ");
                warn!(plugin = %descriptor.id, problems = %message, "Plugin left unresolved");
                self.starting_errors.insert(
                    descriptor.id.clone(),
                    StartingError::message(&descriptor.id, message),
                );
                continue;
            }

            if !self.loaders.contains(&descriptor.id) {
                match self.archives.load(descriptor) {
                    Ok(archive) => {
                        self.loaders.create(descriptor, archive);
                    }
                    Err(e) => {
                        self.record_failure(&descriptor.id, &e);
                        continue;
                    }
                }
            }

            self.starting_errors.remove(&descriptor.id);
            let state = if self.status.is_disabled(&descriptor.id) {
                PluginState::Disabled
            } else {
                PluginState::Resolved
            };
            self.set_state(&descriptor.id, state, transitions);
        }
        Ok(())
    }

    fn start_all_inner(&self, transitions: &mut Transitions) {
        let order = self.table.read().order.clone();
        for plugin_id in &order {
            match self.state_of(plugin_id) {
                Some(PluginState::Resolved | PluginState::Stopped | PluginState::Failed) => {
                    self.start_inner(plugin_id, transitions);
                }
                _ => {}
            }
        }
    }

    fn start_one(&self, plugin_id: &str, transitions: &mut Transitions) -> Result<PluginState> {
        self.require(plugin_id)?;
        match self.state(plugin_id)? {
            PluginState::Disabled => {
                info!(plugin = %plugin_id, "Enabling disabled plugin before start");
                self.status.enable(plugin_id);
                self.set_state(plugin_id, PluginState::Resolved, transitions);
            }
            PluginState::Created => self.resolve_plugins(transitions)?,
            _ => {}
        }
        Ok(self.start_inner(plugin_id, transitions))
    }

    fn start_inner(&self, plugin_id: &str, transitions: &mut Transitions) -> PluginState {
        let Some(state) = self.state_of(plugin_id) else {
            return PluginState::Created;
        };
        if matches!(
            state,
            PluginState::Started | PluginState::Created | PluginState::Disabled
        ) {
            return state;
        }

        let Ok(descriptor) = self.require(plugin_id) else {
            return state;
        };
        for dependency in descriptor.required_dependencies() {
            let dependency_state = self.start_inner(&dependency.plugin_id, transitions);
            if !dependency_state.is_started() {
                let failure = RuntimeError::start(
                    plugin_id,
                    format!(
                        "required dependency '{}' is {dependency_state}",
                        dependency.plugin_id
                    ),
                );
                self.record_failure(plugin_id, &failure);
                self.set_state(plugin_id, PluginState::Failed, transitions);
                return PluginState::Failed;
            }
        }

        info!(plugin = %plugin_id, version = %descriptor.version, "Starting plugin");
        match self.bring_up(&descriptor) {
            Ok(()) => {
                let index = self.start_counter.fetch_add(1, Ordering::SeqCst);
                if let Some(record) = self.table.write().records.get_mut(plugin_id) {
                    record.start_index = Some(index);
                }
                self.starting_errors.remove(plugin_id);
                self.set_state(plugin_id, PluginState::Started, transitions);
                transitions.push(LifecycleEvent::PluginStarted {
                    plugin_id: plugin_id.to_string(),
                });
                PluginState::Started
            }
            Err(failure) => {
                self.tear_down(plugin_id);
                self.record_failure(plugin_id, &failure);
                self.set_state(plugin_id, PluginState::Failed, transitions);
                PluginState::Failed
            }
        }
    }

    fn bring_up(&self, descriptor: &Arc<PluginDescriptor>) -> Result<()> {
        let plugin_id = descriptor.id.as_str();
        let loader = self.loaders.get(plugin_id)?;
        let container = self.containers.create(plugin_id, loader.clone());
        self.engine.register_all(plugin_id, &container)?;

        let mut entry = match self.take_entry(plugin_id) {
            Some(entry) => entry,
            None => loader
                .archive()
                .entry(&descriptor.plugin_class)
                .map_err(|e| RuntimeError::start(plugin_id, e))?,
        };
        let ctx = PluginContext::new(descriptor.clone(), container.clone() as Arc<dyn ComponentContainer>);
        let started = guard(|| entry.start(&ctx));
        self.put_entry(plugin_id, entry);
        started.map_err(|e| RuntimeError::start(plugin_id, e))?;

        let registered = self.engine.registered(plugin_id);
        self.routes.bind(plugin_id, &registered)?;
        self.events.subscribe(plugin_id, &registered);
        self.cache.invalidate();
        Ok(())
    }

    fn take_entry(&self, plugin_id: &str) -> Option<Box<dyn Plugin>> {
        self.table
            .write()
            .records
            .get_mut(plugin_id)
            .and_then(|r| r.entry.take())
    }

    fn put_entry(&self, plugin_id: &str, entry: Box<dyn Plugin>) {
        if let Some(record) = self.table.write().records.get_mut(plugin_id) {
            record.entry = Some(entry);
        }
    }

    /// Undo everything `bring_up` may have done; never fails
    fn tear_down(&self, plugin_id: &str) {
        self.routes.unbind(plugin_id);
        self.events.unsubscribe(plugin_id);
        let container = self.containers.get(plugin_id).ok();
        self.engine.unregister_all(
            plugin_id,
            container.as_deref().map(|c| c as &dyn ComponentContainer),
        );
        self.containers.destroy(plugin_id);
        self.cache.invalidate();
    }

    fn stop_dependents(&self, plugin_id: &str, transitions: &mut Transitions) {
        loop {
            let next = self
                .dependents(plugin_id)
                .into_iter()
                .find(|d| self.state_of(d) == Some(PluginState::Started));
            let Some(dependent) = next else {
                break;
            };
            self.stop_dependents(&dependent, transitions);
            self.stop_inner(&dependent, transitions);
        }
    }

    fn stop_inner(&self, plugin_id: &str, transitions: &mut Transitions) -> PluginState {
        let Some(state) = self.state_of(plugin_id) else {
            return PluginState::Created;
        };
        if !state.is_started() {
            return state;
        }
        let Ok(descriptor) = self.require(plugin_id) else {
            return state;
        };

        info!(plugin = %plugin_id, "Stopping plugin");
        if let Some(mut entry) = self.take_entry(plugin_id) {
            let container: Arc<dyn ComponentContainer> = match self.containers.get(plugin_id) {
                Ok(container) => container as Arc<dyn ComponentContainer>,
                Err(_) => self.containers.root().clone(),
            };
            let ctx = PluginContext::new(descriptor, container);
            let stopped = guard(|| entry.stop(&ctx));
            self.put_entry(plugin_id, entry);
            if let Err(e) = stopped {
                self.record_failure(plugin_id, &RuntimeError::stop(plugin_id, e));
            }
        }

        self.tear_down(plugin_id);
        if let Some(record) = self.table.write().records.get_mut(plugin_id) {
            record.start_index = None;
        }
        self.set_state(plugin_id, PluginState::Stopped, transitions);
        transitions.push(LifecycleEvent::PluginStopped {
            plugin_id: plugin_id.to_string(),
        });
        PluginState::Stopped
    }

    fn stop_all_inner(&self, transitions: &mut Transitions) {
        for plugin_id in self.started_plugins().iter().rev() {
            self.stop_inner(plugin_id, transitions);
        }
    }

    fn unload_inner(
        &self,
        plugin_id: &str,
        unload_dependents: bool,
        transitions: &mut Transitions,
    ) -> Result<()> {
        if unload_dependents {
            loop {
                let next = self
                    .dependents(plugin_id)
                    .into_iter()
                    .find(|d| self.state_of(d).is_some());
                let Some(dependent) = next else {
                    break;
                };
                self.unload_inner(&dependent, true, transitions)?;
            }
        }

        self.stop_inner(plugin_id, transitions);
        self.discard(&[plugin_id.to_string()]);
        info!(plugin = %plugin_id, "Unloaded plugin");
        self.resolve_plugins(transitions)
    }
}

impl fmt::Debug for PluginLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLifecycleManager")
            .field("plugins_root", &self.config.plugins_root)
            .field("plugins", &self.table.read().order)
            .field("started", &self.started_plugins())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PluginLifecycleManager`]
///
/// Every collaborator has an in-process default: an empty root container,
/// a [`RouteRegistry`], an [`EventBus`], a [`DirectoryRepository`] over the
/// configured plugins root and manifest-based descriptors.
#[derive(Default)]
pub struct PluginLifecycleManagerBuilder {
    config: RuntimeConfig,
    root: Option<Arc<dyn ComponentContainer>>,
    route_table: Option<Arc<dyn RouteTable>>,
    dispatcher: Option<Arc<dyn EventDispatcher>>,
    archives: Option<Arc<dyn ArchiveLoader>>,
    repository: Option<Arc<dyn PluginRepository>>,
    finder: Option<Arc<dyn DescriptorFinder>>,
    shared: Option<Arc<SharedScope>>,
    classifier: Option<Arc<dyn Classifier>>,
}

impl PluginLifecycleManagerBuilder {
    /// Runtime configuration
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the collaborators of an in-process host
    pub fn host(mut self, host: &InProcessHost) -> Self {
        self.root = Some(host.root.clone());
        self.route_table = Some(host.routes.clone());
        self.dispatcher = Some(host.events.clone());
        self
    }

    /// Host root container
    pub fn root_container(mut self, root: Arc<dyn ComponentContainer>) -> Self {
        self.root = Some(root);
        self
    }

    /// Host route table
    pub fn route_table(mut self, table: Arc<dyn RouteTable>) -> Self {
        self.route_table = Some(table);
        self
    }

    /// Host event dispatcher
    pub fn dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Archive loader
    pub fn archive_loader(mut self, loader: Arc<dyn ArchiveLoader>) -> Self {
        self.archives = Some(loader);
        self
    }

    /// Plugin repository
    pub fn repository(mut self, repository: Arc<dyn PluginRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Descriptor finder
    pub fn descriptor_finder(mut self, finder: Arc<dyn DescriptorFinder>) -> Self {
        self.finder = Some(finder);
        self
    }

    /// Host symbols and resources shared with plugins
    pub fn shared_scope(mut self, shared: Arc<SharedScope>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Capability classifier
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Validate the configuration and build the manager
    pub fn build(self) -> Result<PluginLifecycleManager> {
        let config = self.config;
        config.validate()?;
        let policy = SharedResourcePolicy::from_globs(&config.shared_resources)?;

        let root = self.root.unwrap_or_else(|| Arc::new(RootContainer::new()));
        let route_table = self
            .route_table
            .unwrap_or_else(|| Arc::new(RouteRegistry::new()));
        let dispatcher = self.dispatcher.unwrap_or_else(|| Arc::new(EventBus::new()));
        let engine = Arc::new(ExtensionDiscoveryEngine::new(
            self.classifier.unwrap_or_else(|| Arc::new(MarkerClassifier)),
        ));

        Ok(PluginLifecycleManager {
            repository: self
                .repository
                .unwrap_or_else(|| Arc::new(DirectoryRepository::new(&config.plugins_root))),
            finder: self.finder.unwrap_or_else(|| {
                Arc::new(ManifestDescriptorFinder::new(config.manifest_names.clone()))
            }),
            archives: self
                .archives
                .unwrap_or_else(|| Arc::new(StaticArchiveLoader::new())),
            status: PluginStatusProvider::new(
                config.enabled_plugins.iter().cloned(),
                config.disabled_plugins.iter().cloned(),
            ),
            loaders: LoaderRegistry::new(self.shared.unwrap_or_default(), policy),
            containers: ModuleContainerRegistry::new(root),
            cache: ExtensionPointCache::new(engine.clone()),
            engine,
            routes: RouteBridge::new(route_table),
            events: EventBridge::new(dispatcher),
            table: RwLock::new(PluginTable::default()),
            starting_errors: DashMap::new(),
            resolver: RwLock::new(DependencyResolver::new()),
            start_counter: AtomicU64::new(0),
            lifecycle: ReentrantMutex::new(()),
            config,
        })
    }
}

impl fmt::Debug for PluginLifecycleManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLifecycleManagerBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
