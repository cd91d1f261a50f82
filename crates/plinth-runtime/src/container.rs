//! Per-plugin module containers
//!
//! A [`ModuleContainer`] is the isolated component registry of one started
//! plugin. Lookups fall back to the host root container; resources resolve
//! through the plugin's [`CodeLoader`]. Containers must be active before
//! anything is registered into them, and closing one destroys every local
//! component in reverse registration order.

use crate::error::{Result, RuntimeError};
use crate::loader::CodeLoader;
use parking_lot::RwLock;
use plinth_api::{Component, ComponentContainer, PluginError, Resource};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Isolated component registry owned by one plugin
pub struct ModuleContainer {
    plugin_id: String,
    parent: Arc<dyn ComponentContainer>,
    loader: Arc<CodeLoader>,
    components: RwLock<Vec<Component>>,
    active: AtomicBool,
}

impl ModuleContainer {
    fn new(plugin_id: &str, parent: Arc<dyn ComponentContainer>, loader: Arc<CodeLoader>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            parent,
            loader,
            components: RwLock::new(Vec::new()),
            active: AtomicBool::new(false),
        }
    }

    fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Owning plugin id
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Whether the container accepts registrations
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The plugin's code loader
    pub fn loader(&self) -> &Arc<CodeLoader> {
        &self.loader
    }

    /// Names of local components in registration order
    pub fn component_names(&self) -> Vec<String> {
        self.components
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Number of local components
    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    /// Whether the container holds no local component
    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }

    /// Local component by name (no parent fallback)
    pub fn local_component(&self, name: &str) -> Option<Component> {
        self.components
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Deactivate and destroy every local component, newest first
    ///
    /// Returns the teardown failures; they are never fatal.
    pub fn close(&self) -> Vec<RuntimeError> {
        self.active.store(false, Ordering::SeqCst);
        let components = std::mem::take(&mut *self.components.write());

        let mut failures = Vec::new();
        for component in components.iter().rev() {
            if let Err(e) = component.destroy() {
                failures.push(RuntimeError::teardown(
                    &self.plugin_id,
                    format!("component '{}': {e}", component.name()),
                ));
            }
        }
        failures
    }
}

impl ComponentContainer for ModuleContainer {
    fn register_component(&self, component: Component) -> plinth_api::error::Result<()> {
        if !self.is_active() {
            return Err(PluginError::invalid_state(format!(
                "container of '{}' is not active",
                self.plugin_id
            )));
        }

        let mut components = self.components.write();
        if components.iter().any(|c| c.name() == component.name()) {
            return Err(PluginError::component(format!(
                "component '{}' already registered in '{}'",
                component.name(),
                self.plugin_id
            )));
        }
        debug!(plugin = %self.plugin_id, component = %component.name(), "Registered component");
        components.push(component);
        Ok(())
    }

    fn resolve_component(&self, name: &str) -> Option<Component> {
        self.local_component(name)
            .or_else(|| self.parent.resolve_component(name))
    }

    fn resolve_by_type(&self, type_id: TypeId) -> Option<Component> {
        let local = self
            .components
            .read()
            .iter()
            .find(|c| c.type_id() == type_id)
            .cloned();
        local.or_else(|| self.parent.resolve_by_type(type_id))
    }

    fn destroy_component(&self, name: &str) -> plinth_api::error::Result<()> {
        let removed = {
            let mut components = self.components.write();
            components
                .iter()
                .position(|c| c.name() == name)
                .map(|index| components.remove(index))
        };
        match removed {
            Some(component) => component.destroy(),
            None => Err(PluginError::component(format!(
                "no component named '{name}' in '{}'",
                self.plugin_id
            ))),
        }
    }

    fn resource(&self, name: &str) -> Option<Resource> {
        self.loader.resource(name)
    }
}

impl fmt::Debug for ModuleContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContainer")
            .field("plugin_id", &self.plugin_id)
            .field("active", &self.is_active())
            .field("components", &self.component_names())
            .finish()
    }
}

/// Owns one module container per started plugin
#[derive(Debug)]
pub struct ModuleContainerRegistry {
    root: Arc<dyn ComponentContainer>,
    containers: RwLock<HashMap<String, Arc<ModuleContainer>>>,
}

impl ModuleContainerRegistry {
    /// Create a registry whose containers are parented to `root`
    pub fn new(root: Arc<dyn ComponentContainer>) -> Self {
        Self {
            root,
            containers: RwLock::new(HashMap::new()),
        }
    }

    /// The host root container
    pub fn root(&self) -> &Arc<dyn ComponentContainer> {
        &self.root
    }

    /// Return the active container of a plugin, creating and activating it if needed
    pub fn create(&self, plugin_id: &str, loader: Arc<CodeLoader>) -> Arc<ModuleContainer> {
        if let Some(existing) = self.containers.read().get(plugin_id) {
            return existing.clone();
        }

        let mut containers = self.containers.write();
        if let Some(existing) = containers.get(plugin_id) {
            return existing.clone();
        }

        let container = Arc::new(ModuleContainer::new(plugin_id, self.root.clone(), loader));
        container.activate();
        containers.insert(plugin_id.to_string(), container.clone());
        info!(plugin = %plugin_id, "Created module container");
        container
    }

    /// Close and remove a plugin's container; failures are logged, never returned
    pub fn destroy(&self, plugin_id: &str) {
        let Some(container) = self.containers.write().remove(plugin_id) else {
            return;
        };

        let failures = container.close();
        for failure in &failures {
            warn!(plugin = %plugin_id, error = %failure, "Component teardown failed");
        }
        info!(
            plugin = %plugin_id,
            failures = failures.len(),
            "Destroyed module container"
        );
    }

    /// Active container of a plugin
    pub fn get(&self, plugin_id: &str) -> Result<Arc<ModuleContainer>> {
        self.containers
            .read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(format!("module container for '{plugin_id}'")))
    }

    /// Whether a plugin has an active container
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.containers.read().contains_key(plugin_id)
    }
}
