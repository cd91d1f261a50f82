//! Archive loaders turn a descriptor into the plugin's packaged code

use crate::error::{Result, RuntimeError};
use dashmap::DashMap;
use plinth_api::{PluginArchive, PluginDescriptor};
use std::fmt;
use std::sync::Arc;

/// Loads the archive of a plugin
pub trait ArchiveLoader: Send + Sync + fmt::Debug {
    /// Whether this loader can produce the archive for `descriptor`
    fn is_applicable(&self, descriptor: &PluginDescriptor) -> bool;

    /// Produce the archive
    fn load(&self, descriptor: &PluginDescriptor) -> Result<PluginArchive>;
}

type ArchiveConstructor = Arc<dyn Fn() -> PluginArchive + Send + Sync>;

/// Archives compiled into the host, keyed by the descriptor's `plugin_class`
#[derive(Default)]
pub struct StaticArchiveLoader {
    constructors: DashMap<String, ArchiveConstructor>,
}

impl StaticArchiveLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the archive constructor for an entry point class
    pub fn register<F>(&self, plugin_class: impl Into<String>, constructor: F)
    where
        F: Fn() -> PluginArchive + Send + Sync + 'static,
    {
        self.constructors
            .insert(plugin_class.into(), Arc::new(constructor));
    }

    /// Builder form of [`StaticArchiveLoader::register`]
    pub fn with_archive<F>(self, plugin_class: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> PluginArchive + Send + Sync + 'static,
    {
        self.register(plugin_class, constructor);
        self
    }

    /// Registered entry point classes
    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<_> = self.constructors.iter().map(|e| e.key().clone()).collect();
        classes.sort();
        classes
    }
}

impl fmt::Debug for StaticArchiveLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticArchiveLoader")
            .field("classes", &self.classes())
            .finish()
    }
}

impl ArchiveLoader for StaticArchiveLoader {
    fn is_applicable(&self, descriptor: &PluginDescriptor) -> bool {
        self.constructors.contains_key(&descriptor.plugin_class)
    }

    fn load(&self, descriptor: &PluginDescriptor) -> Result<PluginArchive> {
        let constructor = self
            .constructors
            .get(&descriptor.plugin_class)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                RuntimeError::not_found(format!("archive for class '{}'", descriptor.plugin_class))
            })?;

        let archive = plinth_api::error::guard(|| Ok(constructor()))?;
        if !archive.has_entry(&descriptor.plugin_class) {
            return Err(RuntimeError::start(
                &descriptor.id,
                format!("archive has no entry point '{}'", descriptor.plugin_class),
            ));
        }
        Ok(archive)
    }
}

/// Tries a list of loaders in order
#[derive(Debug, Default)]
pub struct CompoundArchiveLoader {
    loaders: Vec<Arc<dyn ArchiveLoader>>,
}

impl CompoundArchiveLoader {
    /// Create an empty compound loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a loader
    pub fn add(mut self, loader: Arc<dyn ArchiveLoader>) -> Self {
        self.loaders.push(loader);
        self
    }
}

impl ArchiveLoader for CompoundArchiveLoader {
    fn is_applicable(&self, descriptor: &PluginDescriptor) -> bool {
        self.loaders.iter().any(|l| l.is_applicable(descriptor))
    }

    fn load(&self, descriptor: &PluginDescriptor) -> Result<PluginArchive> {
        self.loaders
            .iter()
            .find(|l| l.is_applicable(descriptor))
            .ok_or_else(|| {
                RuntimeError::not_found(format!("archive loader for plugin '{}'", descriptor.id))
            })?
            .load(descriptor)
    }
}

#[cfg(feature = "dynamic-loading")]
pub use native::NativeArchiveLoader;

#[cfg(feature = "dynamic-loading")]
mod native {
    #![allow(unsafe_code)]

    use super::ArchiveLoader;
    use crate::error::{Result, RuntimeError};
    use libloading::{Library, Symbol};
    use parking_lot::Mutex;
    use plinth_api::{PluginArchive, PluginDescriptor};
    use std::path::PathBuf;
    use tracing::info;

    const EXPORT: &[u8] = b"plinth_plugin_archive";

    /// Opens `cdylib` plugins exporting `plinth_plugin_archive` (see `declare_plugin!`)
    ///
    /// Libraries stay mapped until the loader is dropped: symbols handed out
    /// by an archive may outlive the plugin that produced them.
    #[derive(Debug, Default)]
    pub struct NativeArchiveLoader {
        libraries: Mutex<Vec<Library>>,
    }

    impl NativeArchiveLoader {
        /// Create a loader
        pub fn new() -> Self {
            Self::default()
        }

        /// Library file expected inside the plugin directory
        pub fn library_path(descriptor: &PluginDescriptor) -> PathBuf {
            let stem = descriptor.id.replace('-', "_");
            descriptor.path.join(libloading::library_filename(stem))
        }
    }

    impl ArchiveLoader for NativeArchiveLoader {
        fn is_applicable(&self, descriptor: &PluginDescriptor) -> bool {
            Self::library_path(descriptor).is_file()
        }

        fn load(&self, descriptor: &PluginDescriptor) -> Result<PluginArchive> {
            let path = Self::library_path(descriptor);
            // SAFETY: the library is a plinth plugin built against the same
            // plinth-api and compiler as the host; its initialisers are trusted.
            let library = unsafe { Library::new(&path) }.map_err(|e| {
                RuntimeError::start(&descriptor.id, format!("cannot open {}: {e}", path.display()))
            })?;

            let archive = {
                // SAFETY: `declare_plugin!` exports this symbol with exactly this signature.
                let constructor: Symbol<'_, fn() -> PluginArchive> =
                    unsafe { library.get(EXPORT) }.map_err(|e| {
                        RuntimeError::start(&descriptor.id, format!("missing plugin export: {e}"))
                    })?;
                plinth_api::error::guard(|| Ok(constructor()))?
            };

            info!(plugin = %descriptor.id, library = %path.display(), "Opened plugin library");
            self.libraries.lock().push(library);
            Ok(archive)
        }
    }
}
