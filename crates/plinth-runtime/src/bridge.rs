//! Route and event bridges between plugin containers and the host

use crate::discovery::RegisteredExtension;
use crate::error::{Result, RuntimeError};
use parking_lot::Mutex;
use plinth_api::{EventDispatcher, ExternalHandler, RouteBinding, RouteTable};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pushes discovered handlers into the host route table and tracks the bindings
#[derive(Debug)]
pub struct RouteBridge {
    table: Arc<dyn RouteTable>,
    bindings: Mutex<HashMap<String, Vec<RouteBinding>>>,
}

impl RouteBridge {
    /// Create a bridge over the host route table
    pub fn new(table: Arc<dyn RouteTable>) -> Self {
        Self {
            table,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Bind the routes of every handler a plugin registered
    ///
    /// Bindings are recorded as they succeed, so a failure part way through
    /// still leaves [`RouteBridge::unbind`] able to undo the rest.
    pub fn bind(&self, plugin_id: &str, registered: &[RegisteredExtension]) -> Result<usize> {
        let mut bound = 0;
        for extension in registered.iter().filter(|r| r.descriptor.roles.external_handler) {
            let instance = extension.component.instance();
            let handler = ExternalHandler {
                owner: plugin_id.to_string(),
                component: extension.descriptor.component_name.clone(),
                routes: extension
                    .descriptor
                    .symbol
                    .routes()
                    .iter()
                    .map(|route| route.bind(instance))
                    .collect(),
            };

            let bindings = self.table.bind(&handler).map_err(|e| {
                RuntimeError::start(plugin_id, format!("cannot bind '{}': {e}", handler.component))
            })?;
            for binding in &bindings {
                debug!(plugin = %plugin_id, route = %binding, "Bound plugin route");
            }
            bound += bindings.len();
            self.bindings
                .lock()
                .entry(plugin_id.to_string())
                .or_default()
                .extend(bindings);
        }

        if bound > 0 {
            info!(plugin = %plugin_id, routes = bound, "Bound plugin routes");
        }
        Ok(bound)
    }

    /// Unbind every route produced for a plugin; failures are logged
    pub fn unbind(&self, plugin_id: &str) -> Vec<RouteBinding> {
        let Some(bindings) = self.bindings.lock().remove(plugin_id) else {
            return Vec::new();
        };

        for binding in &bindings {
            if let Err(e) = self.table.unbind(binding) {
                warn!(plugin = %plugin_id, route = %binding, error = %e, "Route unbind failed");
            }
        }
        info!(plugin = %plugin_id, routes = bindings.len(), "Unbound plugin routes");
        bindings
    }

    /// Live bindings of a plugin
    pub fn bindings(&self, plugin_id: &str) -> Vec<RouteBinding> {
        self.bindings
            .lock()
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Subscribes discovered listener methods to the host dispatcher
#[derive(Debug)]
pub struct EventBridge {
    dispatcher: Arc<dyn EventDispatcher>,
}

impl EventBridge {
    /// Create a bridge over the host dispatcher
    pub fn new(dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// The host dispatcher
    pub fn dispatcher(&self) -> &Arc<dyn EventDispatcher> {
        &self.dispatcher
    }

    /// Subscribe every listener of a plugin's subscribers, owned by the plugin id
    pub fn subscribe(&self, plugin_id: &str, registered: &[RegisteredExtension]) -> usize {
        let mut count = 0;
        for extension in registered.iter().filter(|r| r.descriptor.roles.event_subscriber) {
            for listener in extension.descriptor.symbol.listeners() {
                let subscriber = listener.subscriber(
                    &extension.descriptor.component_name,
                    extension.component.instance(),
                );
                debug!(plugin = %plugin_id, listener = %subscriber.name, "Subscribed listener");
                self.dispatcher.subscribe(plugin_id, subscriber);
                count += 1;
            }
        }
        count
    }

    /// Remove every subscription owned by a plugin
    pub fn unsubscribe(&self, plugin_id: &str) -> usize {
        let removed = self.dispatcher.unsubscribe_all(plugin_id);
        if removed > 0 {
            debug!(plugin = %plugin_id, listeners = removed, "Unsubscribed listeners");
        }
        removed
    }
}
