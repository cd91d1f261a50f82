//! Mock host collaborators and plugins for testing

use crate::component::{Component, ComponentContainer, Resource};
use crate::error::{PluginError, Result};
use crate::event::{Event, EventDispatcher, Subscriber};
use crate::plugin::{Plugin, PluginContext};
use crate::route::{ExternalHandler, RouteBinding, RouteTable};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock plugin entry point that counts hook calls
#[derive(Debug, Clone)]
pub struct MockPlugin {
    start_calls: Arc<Mutex<usize>>,
    stop_calls: Arc<Mutex<usize>>,
    start_failure: Option<String>,
    stop_failure: Option<String>,
}

impl MockPlugin {
    /// Create a new mock plugin
    pub fn new() -> Self {
        Self {
            start_calls: Arc::new(Mutex::new(0)),
            stop_calls: Arc::new(Mutex::new(0)),
            start_failure: None,
            stop_failure: None,
        }
    }

    /// Make the start hook fail with `message`
    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_failure = Some(message.into());
        self
    }

    /// Make the stop hook fail with `message`
    pub fn failing_stop(mut self, message: impl Into<String>) -> Self {
        self.stop_failure = Some(message.into());
        self
    }

    /// Get the number of times start was called
    pub fn start_calls(&self) -> usize {
        *self.start_calls.lock().unwrap()
    }

    /// Get the number of times stop was called
    pub fn stop_calls(&self) -> usize {
        *self.stop_calls.lock().unwrap()
    }
}

impl Default for MockPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for MockPlugin {
    fn start(&mut self, _ctx: &PluginContext) -> Result<()> {
        *self.start_calls.lock().unwrap() += 1;
        match &self.start_failure {
            Some(message) => Err(PluginError::runtime(message)),
            None => Ok(()),
        }
    }

    fn stop(&mut self, _ctx: &PluginContext) -> Result<()> {
        *self.stop_calls.lock().unwrap() += 1;
        match &self.stop_failure {
            Some(message) => Err(PluginError::runtime(message)),
            None => Ok(()),
        }
    }
}

/// In-memory component container with an optional parent
#[derive(Debug, Default)]
pub struct MockContainer {
    components: Mutex<Vec<Component>>,
    resources: Mutex<HashMap<String, Resource>>,
    parent: Option<Arc<dyn ComponentContainer>>,
}

impl MockContainer {
    /// Create an empty root container
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a container parented to `parent`
    pub fn with_parent(parent: Arc<dyn ComponentContainer>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Serve a resource from this container
    pub fn add_resource(&self, resource: Resource) {
        self.resources
            .lock()
            .unwrap()
            .insert(resource.name.clone(), resource);
    }

    /// Names of the local components in registration order
    pub fn component_names(&self) -> Vec<String> {
        self.components
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }
}

impl ComponentContainer for MockContainer {
    fn register_component(&self, component: Component) -> Result<()> {
        let mut components = self.components.lock().unwrap();
        if components.iter().any(|c| c.name() == component.name()) {
            return Err(PluginError::component(format!(
                "component '{}' already registered",
                component.name()
            )));
        }
        components.push(component);
        Ok(())
    }

    fn resolve_component(&self, name: &str) -> Option<Component> {
        let local = self
            .components
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name() == name)
            .cloned();
        local.or_else(|| self.parent.as_ref()?.resolve_component(name))
    }

    fn resolve_by_type(&self, type_id: TypeId) -> Option<Component> {
        let local = self
            .components
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.type_id() == type_id)
            .cloned();
        local.or_else(|| self.parent.as_ref()?.resolve_by_type(type_id))
    }

    fn destroy_component(&self, name: &str) -> Result<()> {
        let removed = {
            let mut components = self.components.lock().unwrap();
            let index = components.iter().position(|c| c.name() == name);
            index.map(|i| components.remove(i))
        };
        match removed {
            Some(component) => component.destroy(),
            None => Err(PluginError::component(format!("no component named '{name}'"))),
        }
    }

    fn resource(&self, name: &str) -> Option<Resource> {
        self.resources.lock().unwrap().get(name).cloned()
    }
}

/// Route table that records every bind and unbind
#[derive(Debug, Default)]
pub struct RecordingRouteTable {
    bound: Mutex<Vec<RouteBinding>>,
    unbound: Mutex<Vec<RouteBinding>>,
    handlers: Mutex<Vec<ExternalHandler>>,
}

impl RecordingRouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings currently registered
    pub fn bound(&self) -> Vec<RouteBinding> {
        self.bound.lock().unwrap().clone()
    }

    /// Bindings removed so far
    pub fn unbound(&self) -> Vec<RouteBinding> {
        self.unbound.lock().unwrap().clone()
    }

    /// Find the live handler for a route
    pub fn handler_for(&self, method: &http::Method, path: &str) -> Option<crate::route::BoundRoute> {
        self.handlers
            .lock()
            .unwrap()
            .iter()
            .flat_map(|h| h.routes.iter())
            .find(|r| &r.method == method && r.path == path)
            .cloned()
    }
}

impl RouteTable for RecordingRouteTable {
    fn bind(&self, handler: &ExternalHandler) -> Result<Vec<RouteBinding>> {
        let bindings: Vec<_> = handler
            .routes
            .iter()
            .map(|route| RouteBinding {
                owner: handler.owner.clone(),
                component: handler.component.clone(),
                method: route.method.clone(),
                path: route.path.clone(),
            })
            .collect();
        self.bound.lock().unwrap().extend(bindings.iter().cloned());
        self.handlers.lock().unwrap().push(handler.clone());
        Ok(bindings)
    }

    fn unbind(&self, binding: &RouteBinding) -> Result<()> {
        self.bound.lock().unwrap().retain(|b| b != binding);
        self.handlers.lock().unwrap().retain(|h| {
            !(h.owner == binding.owner && h.component == binding.component)
        });
        self.unbound.lock().unwrap().push(binding.clone());
        Ok(())
    }
}

/// Event dispatcher that records published events and delivers them synchronously
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    published: Mutex<Vec<Event>>,
    subscribers: Mutex<Vec<(String, Subscriber)>>,
}

impl RecordingDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Every published event whose payload is `E`, cloned
    pub fn published<E: Clone + Send + Sync + 'static>(&self) -> Vec<E> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.downcast_ref::<E>().cloned())
            .collect()
    }

    /// Number of subscribers registered by `owner`
    pub fn subscriber_count(&self, owner: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| o == owner)
            .count()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn publish(&self, event: Event) {
        let subscribers: Vec<_> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscriber in subscribers {
            let _ = subscriber.deliver(&event);
        }
        self.published.lock().unwrap().push(event);
    }

    fn subscribe(&self, owner: &str, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .unwrap()
            .push((owner.to_string(), subscriber));
    }

    fn unsubscribe_all(&self, owner: &str) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|(o, _)| o != owner);
        before - subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginDescriptor;

    #[test]
    fn test_mock_plugin() {
        let mut plugin = MockPlugin::new();
        let ctx = PluginContext::new(
            Arc::new(PluginDescriptor::new("mock", "1.0.0", "mock::Plugin")),
            Arc::new(MockContainer::new()),
        );

        assert_eq!(plugin.start_calls(), 0);
        plugin.start(&ctx).unwrap();
        assert_eq!(plugin.start_calls(), 1);
        plugin.stop(&ctx).unwrap();
        assert_eq!(plugin.stop_calls(), 1);

        let mut failing = MockPlugin::new().failing_start("nope");
        assert!(failing.start(&ctx).is_err());
        assert_eq!(failing.start_calls(), 1);
    }

    #[test]
    fn test_mock_container_parent_fallback() {
        let root = Arc::new(MockContainer::new());
        root.register_component(Component::new("shared", Arc::new(42u32)))
            .unwrap();

        let child = MockContainer::with_parent(root.clone());
        child
            .register_component(Component::new("local", Arc::new("x")))
            .unwrap();

        assert!(child.resolve_component("shared").is_some());
        assert!(child.resolve_component("local").is_some());
        assert!(root.resolve_component("local").is_none());
        assert!(child.resolve_by_type(TypeId::of::<u32>()).is_some());
        assert!(child
            .register_component(Component::new("local", Arc::new(1u8)))
            .is_err());

        child.destroy_component("local").unwrap();
        assert!(child.component_names().is_empty());
    }

    #[test]
    fn test_recording_dispatcher() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.subscribe("p", Subscriber::new("s", |_: &u32| Ok(())));
        dispatcher.subscribe("q", Subscriber::new("s", |_: &u32| Ok(())));
        dispatcher.publish(Event::new(5u32));

        assert_eq!(dispatcher.published::<u32>(), vec![5]);
        assert_eq!(dispatcher.unsubscribe_all("p"), 1);
        assert_eq!(dispatcher.subscriber_count("p"), 0);
        assert_eq!(dispatcher.subscriber_count("q"), 1);
    }
}
