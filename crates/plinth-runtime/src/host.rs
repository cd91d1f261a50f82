//! In-process host collaborators
//!
//! Minimal implementations of the contracts the runtime consumes from its
//! host: a root component container, a route registry that can dispatch
//! requests to plugin handlers, and a synchronous event bus. Embedders with
//! their own DI container, router or event system implement the traits in
//! `plinth_api` instead.

use dashmap::DashMap;
use http::{Method, StatusCode};
use parking_lot::RwLock;
use plinth_api::route::HandlerFn;
use plinth_api::{
    Component, ComponentContainer, Event, EventDispatcher, ExternalHandler, HandlerRequest,
    HandlerResponse, PluginError, RouteBinding, RouteTable, Subscriber,
};
use std::any::TypeId;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host root component container
#[derive(Debug, Default)]
pub struct RootContainer {
    components: RwLock<Vec<Component>>,
}

impl RootContainer {
    /// Create an empty root container
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of `register_component` for host wiring
    pub fn with_component(self, component: Component) -> Self {
        self.components.write().push(component);
        self
    }
}

impl ComponentContainer for RootContainer {
    fn register_component(&self, component: Component) -> plinth_api::error::Result<()> {
        let mut components = self.components.write();
        if components.iter().any(|c| c.name() == component.name()) {
            return Err(PluginError::component(format!(
                "component '{}' already registered in the root container",
                component.name()
            )));
        }
        components.push(component);
        Ok(())
    }

    fn resolve_component(&self, name: &str) -> Option<Component> {
        self.components
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    fn resolve_by_type(&self, type_id: TypeId) -> Option<Component> {
        self.components
            .read()
            .iter()
            .find(|c| c.type_id() == type_id)
            .cloned()
    }

    fn destroy_component(&self, name: &str) -> plinth_api::error::Result<()> {
        let removed = {
            let mut components = self.components.write();
            components
                .iter()
                .position(|c| c.name() == name)
                .map(|index| components.remove(index))
        };
        removed
            .ok_or_else(|| PluginError::component(format!("no component named '{name}'")))?
            .destroy()
    }
}

type RouteKey = (Method, String);

/// Route table keyed by method and exact path
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: DashMap<RouteKey, (RouteBinding, RouteEntry)>,
}

#[derive(Clone)]
struct RouteEntry(HandlerFn);

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RouteEntry")
    }
}

impl RouteRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered bindings, sorted by path then method
    pub fn bindings(&self) -> Vec<RouteBinding> {
        let mut bindings: Vec<_> = self.routes.iter().map(|e| e.value().0.clone()).collect();
        bindings.sort_by(|a, b| (&a.path, a.method.as_str()).cmp(&(&b.path, b.method.as_str())));
        bindings
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no route is registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch a request to the bound handler; unknown routes answer 404
    pub fn dispatch(&self, request: &HandlerRequest) -> plinth_api::error::Result<HandlerResponse> {
        let key = (request.method().clone(), request.uri().path().to_string());
        let handler = self.routes.get(&key).map(|e| e.value().1.clone());
        match handler {
            Some(RouteEntry(call)) => call(request),
            None => {
                let mut response = HandlerResponse::new(bytes::Bytes::new());
                *response.status_mut() = StatusCode::NOT_FOUND;
                Ok(response)
            }
        }
    }
}

impl RouteTable for RouteRegistry {
    fn bind(&self, handler: &ExternalHandler) -> plinth_api::error::Result<Vec<RouteBinding>> {
        let mut bindings = Vec::with_capacity(handler.routes.len());
        for route in &handler.routes {
            let key = (route.method.clone(), route.path.clone());
            if let Some(existing) = self.routes.get(&key) {
                let taken = existing.value().0.clone();
                drop(existing);
                for binding in &bindings {
                    let _ = self.unbind(binding);
                }
                return Err(PluginError::handler(format!("route already bound: {taken}")));
            }

            let binding = RouteBinding {
                owner: handler.owner.clone(),
                component: handler.component.clone(),
                method: route.method.clone(),
                path: route.path.clone(),
            };
            self.routes
                .insert(key, (binding.clone(), RouteEntry(route.call.clone())));
            debug!(route = %binding, "Bound route");
            bindings.push(binding);
        }
        Ok(bindings)
    }

    fn unbind(&self, binding: &RouteBinding) -> plinth_api::error::Result<()> {
        let key = (binding.method.clone(), binding.path.clone());
        let removed = self.routes.remove_if(&key, |_, (bound, _)| bound == binding);
        if removed.is_none() {
            return Err(PluginError::handler(format!("route not bound: {binding}")));
        }
        debug!(route = %binding, "Unbound route");
        Ok(())
    }
}

/// Synchronous event bus; listener failures are logged and never reach the publisher
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(String, Subscriber)>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscribers owned by `owner`
    pub fn subscriber_count(&self, owner: &str) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|(o, _)| o == owner)
            .count()
    }
}

impl EventDispatcher for EventBus {
    fn publish(&self, event: Event) {
        let targets: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, s)| s.accepts(&event))
            .cloned()
            .collect();

        for (owner, subscriber) in targets {
            if let Err(e) = subscriber.deliver(&event) {
                warn!(
                    owner = %owner,
                    listener = %subscriber.name,
                    event = %event.type_name(),
                    error = %e,
                    "Event listener failed"
                );
            }
        }
    }

    fn subscribe(&self, owner: &str, subscriber: Subscriber) {
        self.subscribers.write().push((owner.to_string(), subscriber));
    }

    fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(o, _)| o != owner);
        before - subscribers.len()
    }
}

/// Shared handle to the in-process collaborators
#[derive(Debug, Clone, Default)]
pub struct InProcessHost {
    /// Root container
    pub root: Arc<RootContainer>,
    /// Route registry
    pub routes: Arc<RouteRegistry>,
    /// Event bus
    pub events: Arc<EventBus>,
}

impl InProcessHost {
    /// Create a host with empty collaborators
    pub fn new() -> Self {
        Self::default()
    }
}
