//! # Plinth Plugin API
//!
//! This crate provides the SDK for packaging plugins for the plinth runtime
//! and the contracts the runtime consumes from its host.
//!
//! ## Building blocks
//!
//! - **Plugin**: entry point with `start`/`stop` hooks
//! - **Symbols**: named code units carrying capability markers
//!   (component, extension with ordinal, external handler)
//! - **Archives**: the symbols, private resources and entry points of a plugin
//! - **Host contracts**: component container, route table, event dispatcher
//!
//! ## Example
//!
//! ```rust,no_run
//! use plinth_api::prelude::*;
//!
//! pub trait Greeter: Send + Sync {
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
//! #[derive(Debug)]
//! struct HelloPlugin;
//!
//! impl Plugin for HelloPlugin {
//!     fn start(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
//!         let _ = ctx.plugin_id();
//!         Ok(())
//!     }
//!
//!     fn stop(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
//!         Ok(())
//!     }
//! }
//!
//! pub fn archive() -> PluginArchive {
//!     PluginArchive::builder()
//!         .symbol(
//!             SymbolBuilder::new("hello::English", |_| Ok(English))
//!                 .extension(10)
//!                 .implements::<dyn Greeter>(|g| g)
//!                 .build(),
//!         )
//!         .entry("hello::HelloPlugin", || Ok(Box::new(HelloPlugin) as Box<dyn Plugin>))
//!         .build()
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod archive;
pub mod component;
pub mod error;
pub mod event;
pub mod plugin;
pub mod route;
pub mod symbol;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export commonly used types
pub use archive::{ArchiveBuilder, EntryFactory, PluginArchive};
pub use component::{Component, ComponentContainer, Instance, Resource, ResourceOrigin};
pub use error::PluginError;
pub use event::{BatchOperation, Event, EventDispatcher, LifecycleEvent, Subscriber};
pub use plugin::{
    Plugin, PluginContext, PluginDependency, PluginDescriptor, PluginState, StartingError,
};
pub use route::{
    BoundRoute, ExternalHandler, HandlerRequest, HandlerResponse, RouteBinding, RouteTable,
};
pub use symbol::{ExtensionPointId, InjectionContext, Marker, Symbol, SymbolBuilder};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::archive::PluginArchive;
    pub use crate::component::{Component, ComponentContainer};
    pub use crate::error::PluginError;
    pub use crate::event::{Event, LifecycleEvent};
    pub use crate::plugin::{Plugin, PluginContext, PluginDependency, PluginState};
    pub use crate::route::{HandlerRequest, HandlerResponse};
    pub use crate::symbol::{InjectionContext, SymbolBuilder};
}
