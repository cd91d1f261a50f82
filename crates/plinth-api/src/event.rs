//! Event dispatcher contract and lifecycle events

use crate::error::Result;
use crate::plugin::PluginState;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A type-erased event travelling through the host dispatcher
#[derive(Clone)]
pub struct Event {
    type_id: TypeId,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Event {
    /// Wrap a payload
    pub fn new<E: Any + Send + Sync>(payload: E) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            payload: Arc::new(payload),
        }
    }

    /// Payload type id
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Payload type name
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Check the payload type
    pub fn is<E: Any>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    /// Borrow the payload as its concrete type
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("type", &self.type_name).finish()
    }
}

/// Erased listener callback
pub type ListenerFn = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// A listener registered with the dispatcher
#[derive(Clone)]
pub struct Subscriber {
    /// Listener name, unique within its owner
    pub name: String,

    /// Event type the listener accepts
    pub event_type: TypeId,

    /// Event type name
    pub event_name: &'static str,

    handler: ListenerFn,
}

impl Subscriber {
    /// Create a typed subscriber
    pub fn new<E, F>(name: impl Into<String>, handler: F) -> Self
    where
        E: Any + Send + Sync,
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            event_type: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            handler: Arc::new(move |event: &Event| match event.downcast_ref::<E>() {
                Some(payload) => handler(payload),
                None => Ok(()),
            }),
        }
    }

    /// Create a subscriber from an already erased handler
    pub fn from_erased(
        name: impl Into<String>,
        event_type: TypeId,
        event_name: &'static str,
        handler: ListenerFn,
    ) -> Self {
        Self {
            name: name.into(),
            event_type,
            event_name,
            handler,
        }
    }

    /// Whether this subscriber accepts the event
    pub fn accepts(&self, event: &Event) -> bool {
        self.event_type == event.type_id()
    }

    /// Deliver an event; plugin panics are converted into errors
    pub fn deliver(&self, event: &Event) -> Result<()> {
        if !self.accepts(event) {
            return Ok(());
        }
        crate::error::guard(|| (self.handler)(event))
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("event", &self.event_name)
            .finish()
    }
}

/// Event dispatcher capability consumed from the host
pub trait EventDispatcher: Send + Sync + fmt::Debug {
    /// Publish an event to every accepting subscriber
    fn publish(&self, event: Event);

    /// Register a subscriber on behalf of an owner
    fn subscribe(&self, owner: &str, subscriber: Subscriber);

    /// Remove every subscriber registered by an owner, returning how many were removed
    fn unsubscribe_all(&self, owner: &str) -> usize;
}

/// Batch operation that triggered a [`LifecycleEvent::LifecycleBatchChanged`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    /// `start_all`
    StartAll,

    /// `stop_all`
    StopAll,

    /// `reload_all`
    ReloadAll,
}

/// Lifecycle notifications published to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A plugin reached STARTED
    PluginStarted {
        /// Plugin id
        plugin_id: String,
    },

    /// A plugin reached STOPPED
    PluginStopped {
        /// Plugin id
        plugin_id: String,
    },

    /// A plugin changed state
    PluginStateChanged {
        /// Plugin id
        plugin_id: String,
        /// State before the transition
        old_state: PluginState,
        /// State after the transition
        new_state: PluginState,
    },

    /// A batch operation completed
    LifecycleBatchChanged {
        /// Operation that completed
        operation: BatchOperation,
    },
}

impl LifecycleEvent {
    /// Plugin id the event concerns, if any
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            LifecycleEvent::PluginStarted { plugin_id }
            | LifecycleEvent::PluginStopped { plugin_id }
            | LifecycleEvent::PluginStateChanged { plugin_id, .. } => Some(plugin_id),
            LifecycleEvent::LifecycleBatchChanged { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct OrderPlaced(u32);

    #[test]
    fn test_event_downcast() {
        let event = Event::new(OrderPlaced(7));
        assert!(event.is::<OrderPlaced>());
        assert_eq!(event.downcast_ref::<OrderPlaced>().unwrap().0, 7);
        assert!(event.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_subscriber_filters_by_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let subscriber = Subscriber::new("on_order", move |e: &OrderPlaced| {
            counter.fetch_add(e.0 as usize, Ordering::SeqCst);
            Ok(())
        });

        subscriber.deliver(&Event::new(OrderPlaced(3))).unwrap();
        subscriber.deliver(&Event::new("unrelated")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_subscriber_panic_is_contained() {
        let subscriber = Subscriber::new("bad", |_: &OrderPlaced| -> Result<()> { panic!("listener bug") });
        let err = subscriber.deliver(&Event::new(OrderPlaced(1))).unwrap_err();
        assert!(matches!(err, PluginError::Panicked(_)));
    }

    #[test]
    fn test_lifecycle_event_plugin_id() {
        let event = LifecycleEvent::PluginStateChanged {
            plugin_id: "a".into(),
            old_state: PluginState::Resolved,
            new_state: PluginState::Started,
        };
        assert_eq!(event.plugin_id(), Some("a"));

        let batch = LifecycleEvent::LifecycleBatchChanged {
            operation: BatchOperation::StartAll,
        };
        assert_eq!(batch.plugin_id(), None);
    }
}
