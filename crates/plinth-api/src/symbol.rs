//! Code symbols and capability markers
//!
//! A [`Symbol`] is the unit of code a plugin archive exports: a named
//! concrete type together with the capability markers that tell the runtime
//! what to do with it, the extension points it implements, the routes and
//! event listeners it exposes, and a factory that builds an instance with
//! explicit constructor injection.
//!
//! ```rust
//! use plinth_api::symbol::SymbolBuilder;
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self, name: &str) -> String;
//! }
//!
//! struct English;
//!
//! impl Greeter for English {
//!     fn greet(&self, name: &str) -> String {
//!         format!("Hello, {name}")
//!     }
//! }
//!
//! let symbol = SymbolBuilder::new("hello::English", |_| Ok(English))
//!     .extension(10)
//!     .implements::<dyn Greeter>(|g| g)
//!     .build();
//!
//! assert_eq!(symbol.extension_ordinal(), Some(10));
//! ```

use crate::component::{resolve, Component, ComponentContainer, DestroyHook, Instance, Resource};
use crate::error::{guard, PluginError, Result};
use crate::event::{Event, Subscriber};
use crate::route::{BoundRoute, HandlerRequest, HandlerResponse};
use http::Method;
use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Capability marker attached to a symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Plain component registered into the plugin's container
    Component,

    /// Extension point implementation with a priority ordinal (higher first)
    Extension {
        /// Priority ordinal
        ordinal: i32,
    },

    /// Externally routable handler
    Handler,
}

/// Identity of an extension point type (usually a `dyn Trait`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionPointId {
    type_id: TypeId,
    name: &'static str,
}

impl ExtensionPointId {
    /// Identity of `E`
    pub fn of<E: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// Type id of the extension point
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the extension point
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ExtensionPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type ErasedCast = Arc<dyn Fn(&Instance) -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;
type RouteCall = Arc<dyn Fn(&Instance, &HandlerRequest) -> Result<HandlerResponse> + Send + Sync>;
type ListenerCall = Arc<dyn Fn(&Instance, &Event) -> Result<()> + Send + Sync>;
type Factory = Arc<dyn Fn(&InjectionContext<'_>) -> Result<Instance> + Send + Sync>;

/// An extension point implemented by a symbol
#[derive(Clone)]
pub struct ExtensionPointImpl {
    point: ExtensionPointId,
    cast: ErasedCast,
}

impl ExtensionPointImpl {
    /// Extension point implemented
    pub fn point(&self) -> ExtensionPointId {
        self.point
    }

    /// Cast an instance of the implementing symbol to `Arc<E>`
    pub fn cast<E: ?Sized + Send + Sync + 'static>(&self, instance: &Instance) -> Option<Arc<E>> {
        if self.point != ExtensionPointId::of::<E>() {
            return None;
        }
        (self.cast)(instance)?
            .downcast::<Arc<E>>()
            .ok()
            .map(|boxed| *boxed)
    }
}

impl fmt::Debug for ExtensionPointImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtensionPointImpl").field(&self.point.name).finish()
    }
}

/// A route declared by a handler symbol
#[derive(Clone)]
pub struct RouteSpec {
    method: Method,
    path: String,
    call: RouteCall,
}

impl RouteSpec {
    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path pattern
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bind the route to a live instance
    pub fn bind(&self, instance: &Instance) -> BoundRoute {
        let call = self.call.clone();
        let instance = instance.clone();
        BoundRoute {
            method: self.method.clone(),
            path: self.path.clone(),
            call: Arc::new(move |request: &HandlerRequest| guard(|| call(&instance, request))),
        }
    }
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteSpec({} {})", self.method, self.path)
    }
}

/// An event listener method declared by a symbol
#[derive(Clone)]
pub struct ListenerSpec {
    name: String,
    event_type: TypeId,
    event_name: &'static str,
    call: ListenerCall,
}

impl ListenerSpec {
    /// Listener name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event type listened to
    pub fn event_type(&self) -> TypeId {
        self.event_type
    }

    /// Bind the listener to a live instance
    pub fn subscriber(&self, component: &str, instance: &Instance) -> Subscriber {
        let call = self.call.clone();
        let instance = instance.clone();
        Subscriber::from_erased(
            format!("{component}::{}", self.name),
            self.event_type,
            self.event_name,
            Arc::new(move |event: &Event| call(&instance, event)),
        )
    }
}

impl fmt::Debug for ListenerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSpec")
            .field("name", &self.name)
            .field("event", &self.event_name)
            .finish()
    }
}

/// Context handed to symbol factories for constructor injection
pub struct InjectionContext<'a> {
    plugin_id: &'a str,
    container: &'a dyn ComponentContainer,
}

impl<'a> InjectionContext<'a> {
    /// Create a context over a container
    pub fn new(plugin_id: &'a str, container: &'a dyn ComponentContainer) -> Self {
        Self {
            plugin_id,
            container,
        }
    }

    /// Id of the plugin being populated
    pub fn plugin_id(&self) -> &str {
        self.plugin_id
    }

    /// Container components are resolved from
    pub fn container(&self) -> &dyn ComponentContainer {
        self.container
    }

    /// Resolve a required collaborator by name
    pub fn resolve<C: Any + Send + Sync>(&self, name: &str) -> Result<Arc<C>> {
        resolve(self.container, name)
    }

    /// Resolve an optional collaborator by name
    pub fn resolve_optional<C: Any + Send + Sync>(&self, name: &str) -> Option<Arc<C>> {
        self.container.resolve_component(name)?.downcast::<C>()
    }

    /// Resolve a required collaborator by concrete type
    pub fn resolve_by_type<C: Any + Send + Sync>(&self) -> Result<Arc<C>> {
        self.container
            .resolve_by_type(TypeId::of::<C>())
            .and_then(|c| c.downcast::<C>())
            .ok_or_else(|| {
                PluginError::component(format!(
                    "no component of type {}",
                    std::any::type_name::<C>()
                ))
            })
    }

    /// Look up a resource through the plugin's loader
    pub fn resource(&self, name: &str) -> Option<Resource> {
        self.container.resource(name)
    }
}

impl fmt::Debug for InjectionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionContext")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}

/// A code unit exported by a plugin archive
#[derive(Clone)]
pub struct Symbol {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    markers: Vec<Marker>,
    extension_points: Vec<ExtensionPointImpl>,
    routes: Vec<RouteSpec>,
    listeners: Vec<ListenerSpec>,
    factory: Factory,
    destroy_hook: Option<DestroyHook>,
}

impl Symbol {
    /// Fully qualified symbol name, also used as the component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concrete type id of instances
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Concrete type name of instances
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Capability markers
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Whether the symbol carries at least one capability marker
    pub fn is_marked(&self) -> bool {
        !self.markers.is_empty()
    }

    /// Whether the symbol is marked as a plain component
    pub fn is_component(&self) -> bool {
        self.markers.contains(&Marker::Component)
    }

    /// Whether the symbol is marked as an external handler
    pub fn is_handler(&self) -> bool {
        self.markers.contains(&Marker::Handler)
    }

    /// Extension ordinal when marked as an extension
    pub fn extension_ordinal(&self) -> Option<i32> {
        self.markers.iter().find_map(|m| match m {
            Marker::Extension { ordinal } => Some(*ordinal),
            _ => None,
        })
    }

    /// Extension points implemented
    pub fn extension_points(&self) -> &[ExtensionPointImpl] {
        &self.extension_points
    }

    /// The implementation of a given extension point, if any
    pub fn extension_point(&self, point: ExtensionPointId) -> Option<&ExtensionPointImpl> {
        self.extension_points.iter().find(|p| p.point == point)
    }

    /// Declared routes
    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    /// Declared event listeners
    pub fn listeners(&self) -> &[ListenerSpec] {
        &self.listeners
    }

    /// Build a component instance; factory panics become errors
    pub fn instantiate(&self, ctx: &InjectionContext<'_>) -> Result<Component> {
        let instance = guard(|| (self.factory)(ctx))?;
        let component = Component::from_erased(&self.name, self.type_id, self.type_name, instance);
        Ok(match &self.destroy_hook {
            Some(hook) => component.with_destroy_hook(hook.clone()),
            None => component,
        })
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("markers", &self.markers)
            .field("extension_points", &self.extension_points)
            .field("routes", &self.routes)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

/// Typed builder for [`Symbol`]
pub struct SymbolBuilder<T> {
    name: String,
    markers: Vec<Marker>,
    extension_points: Vec<ExtensionPointImpl>,
    routes: Vec<RouteSpec>,
    listeners: Vec<ListenerSpec>,
    factory: Factory,
    destroy_hook: Option<DestroyHook>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> SymbolBuilder<T> {
    /// Start a symbol built by `factory`
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&InjectionContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            markers: Vec::new(),
            extension_points: Vec::new(),
            routes: Vec::new(),
            listeners: Vec::new(),
            factory: Arc::new(move |ctx: &InjectionContext<'_>| {
                factory(ctx).map(|value| Arc::new(value) as Instance)
            }),
            destroy_hook: None,
            _type: PhantomData,
        }
    }

    fn mark(mut self, marker: Marker) -> Self {
        self.markers.retain(|m| {
            !matches!(
                (m, &marker),
                (Marker::Extension { .. }, Marker::Extension { .. })
            ) && m != &marker
        });
        self.markers.push(marker);
        self
    }

    /// Mark as a plain component
    pub fn component(self) -> Self {
        self.mark(Marker::Component)
    }

    /// Mark as an extension with a priority ordinal
    pub fn extension(self, ordinal: i32) -> Self {
        self.mark(Marker::Extension { ordinal })
    }

    /// Mark as an externally routable handler
    pub fn handler(self) -> Self {
        self.mark(Marker::Handler)
    }

    /// Declare that instances implement extension point `E`
    pub fn implements<E>(mut self, cast: fn(Arc<T>) -> Arc<E>) -> Self
    where
        E: ?Sized + Send + Sync + 'static,
    {
        let erased: ErasedCast = Arc::new(move |instance: &Instance| {
            let concrete = instance.clone().downcast::<T>().ok()?;
            let point: Arc<E> = cast(concrete);
            Some(Box::new(point) as Box<dyn Any + Send + Sync>)
        });
        let point = ExtensionPointId::of::<E>();
        self.extension_points.retain(|p| p.point != point);
        self.extension_points.push(ExtensionPointImpl {
            point,
            cast: erased,
        });
        self
    }

    /// Declare a route served by instances
    pub fn route<F>(mut self, method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&T, &HandlerRequest) -> Result<HandlerResponse> + Send + Sync + 'static,
    {
        let path = path.into();
        let target = path.clone();
        self.routes.push(RouteSpec {
            method,
            path,
            call: Arc::new(move |instance: &Instance, request: &HandlerRequest| {
                let this = instance.downcast_ref::<T>().ok_or_else(|| {
                    PluginError::handler(format!("handler for {target} bound to a foreign instance"))
                })?;
                handler(this, request)
            }),
        });
        self
    }

    /// Declare an event listener method
    pub fn listener<E, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        E: Any + Send + Sync,
        F: Fn(&T, &E) -> Result<()> + Send + Sync + 'static,
    {
        self.listeners.push(ListenerSpec {
            name: name.into(),
            event_type: TypeId::of::<E>(),
            event_name: std::any::type_name::<E>(),
            call: Arc::new(move |instance: &Instance, event: &Event| {
                match (instance.downcast_ref::<T>(), event.downcast_ref::<E>()) {
                    (Some(this), Some(payload)) => handler(this, payload),
                    _ => Ok(()),
                }
            }),
        });
        self
    }

    /// Teardown hook run when the component is destroyed
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.destroy_hook = Some(Arc::new(move |instance: &Instance| {
            match instance.downcast_ref::<T>() {
                Some(this) => hook(this),
                None => Ok(()),
            }
        }));
        self
    }

    /// Finish the symbol
    pub fn build(self) -> Symbol {
        Symbol {
            name: self.name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            markers: self.markers,
            extension_points: self.extension_points,
            routes: self.routes,
            listeners: self.listeners,
            factory: self.factory,
            destroy_hook: self.destroy_hook,
        }
    }
}

impl<T> fmt::Debug for SymbolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolBuilder")
            .field("name", &self.name)
            .field("markers", &self.markers)
            .finish_non_exhaustive()
    }
}
