//! Component container contract
//!
//! The host owns a root container; every started plugin gets a module
//! container parented to it. Lookups that are not satisfied locally fall
//! back to the parent.

use crate::error::{PluginError, Result};
use bytes::Bytes;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Type-erased component instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Teardown hook run when a component is destroyed
pub type DestroyHook = Arc<dyn Fn(&Instance) -> Result<()> + Send + Sync>;

/// A named component instance living in a container
#[derive(Clone)]
pub struct Component {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    instance: Instance,
    destroy_hook: Option<DestroyHook>,
}

impl Component {
    /// Wrap a concrete instance
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, instance: Arc<T>) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            instance,
            destroy_hook: None,
        }
    }

    /// Wrap an already erased instance whose concrete type is known
    pub fn from_erased(
        name: impl Into<String>,
        type_id: TypeId,
        type_name: &'static str,
        instance: Instance,
    ) -> Self {
        Self {
            name: name.into(),
            type_id,
            type_name,
            instance,
            destroy_hook: None,
        }
    }

    /// Attach a teardown hook
    pub fn with_destroy_hook(mut self, hook: DestroyHook) -> Self {
        self.destroy_hook = Some(hook);
        self
    }

    /// Component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Concrete type id of the instance
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Concrete type name of the instance
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The erased instance
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Downcast to the concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.instance.clone().downcast::<T>().ok()
    }

    /// Run the teardown hook, if any
    pub fn destroy(&self) -> Result<()> {
        match &self.destroy_hook {
            Some(hook) => crate::error::guard(|| hook(&self.instance)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("has_destroy_hook", &self.destroy_hook.is_some())
            .finish()
    }
}

/// Where a resource was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOrigin {
    /// A plugin's private archive
    Plugin(String),

    /// The host's shared resources
    Host,
}

/// A non-code resource (asset, template)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Resource name
    pub name: String,

    /// Where the resource was found
    pub origin: ResourceOrigin,

    /// Content
    pub data: Bytes,
}

/// Component container capability consumed from the host
pub trait ComponentContainer: Send + Sync + fmt::Debug {
    /// Register a component; names are unique per container
    fn register_component(&self, component: Component) -> Result<()>;

    /// Resolve a component by name, falling back to the parent
    fn resolve_component(&self, name: &str) -> Option<Component>;

    /// Resolve the first component of the given concrete type, falling back to the parent
    fn resolve_by_type(&self, type_id: TypeId) -> Option<Component>;

    /// Remove a component and run its teardown hook
    fn destroy_component(&self, name: &str) -> Result<()>;

    /// Look up a resource through the container's resource delegate
    fn resource(&self, _name: &str) -> Option<Resource> {
        None
    }
}

/// Resolve a component by name and downcast it
pub fn resolve<T: Any + Send + Sync>(
    container: &dyn ComponentContainer,
    name: &str,
) -> Result<Arc<T>> {
    let component = container
        .resolve_component(name)
        .ok_or_else(|| PluginError::component(format!("no component named '{name}'")))?;
    component.downcast::<T>().ok_or_else(|| {
        PluginError::component(format!(
            "component '{name}' is a {}, not a {}",
            component.type_name(),
            std::any::type_name::<T>()
        ))
    })
}
