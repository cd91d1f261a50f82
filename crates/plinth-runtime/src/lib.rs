//! # Plinth Runtime
//!
//! Dynamic plugin runtime: loads, isolates, starts, stops, reloads and
//! unloads plugins inside a running host.
//!
//! ## Features
//!
//! - **Lifecycle management**: dependency ordered start/stop with per-plugin
//!   failure isolation
//! - **Isolated code loading**: parent-first symbols, plugin-first resources
//! - **Module containers**: one component registry per started plugin,
//!   parented to the host root container
//! - **Extension discovery**: capability markers classified into handlers,
//!   subscribers, extensions and plain components
//! - **Extension lookup**: priority sorted, cached per extension point
//! - **Hot reload**: reload changed plugin directories without a restart
//!
//! ## Example
//!
//! ```rust,no_run
//! use plinth_runtime::prelude::*;
//! use std::sync::Arc;
//!
//! # trait Greeter: Send + Sync {}
//! # fn hello_archive() -> plinth_api::PluginArchive { unimplemented!() }
//! # fn example() -> Result<()> {
//! let archives = StaticArchiveLoader::new().with_archive("hello::HelloPlugin", hello_archive);
//!
//! let manager = PluginLifecycleManager::builder()
//!     .config(RuntimeConfig::load("plinth.yaml")?)
//!     .archive_loader(Arc::new(archives))
//!     .build()?;
//!
//! manager.load_all()?;
//! manager.start_all();
//!
//! for greeter in manager.lookup::<dyn Greeter>().iter() {
//!     let _ = greeter;
//! }
//!
//! manager.stop_all();
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(feature = "dynamic-loading"), forbid(unsafe_code))]
#![cfg_attr(feature = "dynamic-loading", deny(unsafe_code))]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod archive;
pub mod bridge;
pub mod config;
pub mod container;
pub mod dependency;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod extension;
pub mod host;
pub mod hot_reload;
pub mod loader;
pub mod manager;
pub mod repository;
pub mod status;

pub use archive::{ArchiveLoader, CompoundArchiveLoader, StaticArchiveLoader};
#[cfg(feature = "dynamic-loading")]
pub use archive::NativeArchiveLoader;
pub use bridge::{EventBridge, RouteBridge};
pub use config::{ConfigFormat, HotReloadConfig, RuntimeConfig};
pub use container::{ModuleContainer, ModuleContainerRegistry};
pub use dependency::{DependencyResolver, ResolveResult, WrongDependencyVersion};
pub use descriptor::{DescriptorFinder, ManifestDescriptorFinder};
pub use discovery::{
    Classifier, ExtensionDescriptor, ExtensionDiscoveryEngine, MarkerClassifier,
    RegisteredExtension, Roles,
};
pub use error::{Result, RuntimeError};
pub use extension::{ExtensionItem, ExtensionList, ExtensionPointCache};
pub use host::{EventBus, InProcessHost, RootContainer, RouteRegistry};
pub use hot_reload::{HotReloadWatcher, ReloadEvent};
pub use loader::{
    CodeLoader, LoaderRegistry, ResolvedSymbol, SharedResourcePolicy, SharedScope, SymbolOrigin,
};
pub use manager::{PluginInfo, PluginLifecycleManager, PluginLifecycleManagerBuilder};
pub use repository::{DirectoryRepository, PluginRepository};
pub use status::PluginStatusProvider;

// Re-export plugin API types for convenience
pub use plinth_api::{
    LifecycleEvent, Plugin, PluginDependency, PluginDescriptor, PluginError, PluginState,
    StartingError,
};

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::archive::StaticArchiveLoader;
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{Result, RuntimeError};
    pub use crate::extension::ExtensionList;
    pub use crate::host::InProcessHost;
    pub use crate::manager::{PluginInfo, PluginLifecycleManager};
    pub use plinth_api::prelude::*;
}
