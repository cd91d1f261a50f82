//! Plugin archives
//!
//! An archive is what a packaged plugin hands to the runtime: its exported
//! symbols, private resources, and the entry point factories named by
//! descriptors.

use crate::error::{PluginError, Result};
use crate::plugin::Plugin;
use crate::symbol::Symbol;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Entry point factory
pub type EntryFactory = Arc<dyn Fn() -> Result<Box<dyn Plugin>> + Send + Sync>;

/// Packaged plugin code and resources
#[derive(Clone, Default)]
pub struct PluginArchive {
    symbols: Vec<Arc<Symbol>>,
    resources: BTreeMap<String, Bytes>,
    entries: HashMap<String, EntryFactory>,
}

impl PluginArchive {
    /// Start building an archive
    pub fn builder() -> ArchiveBuilder {
        ArchiveBuilder::default()
    }

    /// Symbols in declaration order
    ///
    /// Components are instantiated in this order, so a symbol whose factory
    /// resolves another component of the same plugin must come after it.
    pub fn symbols(&self) -> &[Arc<Symbol>] {
        &self.symbols
    }

    /// Find a symbol by name
    pub fn symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        self.symbols.iter().find(|s| s.name() == name).cloned()
    }

    /// Private resource content
    pub fn resource(&self, name: &str) -> Option<Bytes> {
        self.resources.get(name).cloned()
    }

    /// Private resource names
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Build the entry point named `class`
    pub fn entry(&self, class: &str) -> Result<Box<dyn Plugin>> {
        let factory = self
            .entries
            .get(class)
            .ok_or_else(|| PluginError::runtime(format!("archive has no entry point '{class}'")))?;
        crate::error::guard(|| factory())
    }

    /// Whether an entry point named `class` exists
    pub fn has_entry(&self, class: &str) -> bool {
        self.entries.contains_key(class)
    }
}

impl fmt::Debug for PluginArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginArchive")
            .field("symbols", &self.symbols.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`PluginArchive`]
#[derive(Default)]
pub struct ArchiveBuilder {
    archive: PluginArchive,
}

impl ArchiveBuilder {
    /// Add a symbol
    pub fn symbol(mut self, symbol: Symbol) -> Self {
        self.archive.symbols.retain(|s| s.name() != symbol.name());
        self.archive.symbols.push(Arc::new(symbol));
        self
    }

    /// Add a private resource
    pub fn resource(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.archive.resources.insert(name.into(), data.into());
        self
    }

    /// Add an entry point factory
    pub fn entry<F>(mut self, class: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.archive.entries.insert(class.into(), Arc::new(factory));
        self
    }

    /// Finish the archive
    pub fn build(self) -> PluginArchive {
        self.archive
    }
}

impl fmt::Debug for ArchiveBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveBuilder")
            .field("archive", &self.archive)
            .finish()
    }
}

/// Export a plugin archive from a `cdylib` so the runtime can open it
///
/// ```rust,ignore
/// fn archive() -> plinth_api::PluginArchive {
///     plinth_api::PluginArchive::builder().build()
/// }
///
/// plinth_api::declare_plugin!(archive);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:path) => {
        #[no_mangle]
        pub extern "Rust" fn plinth_plugin_archive() -> $crate::archive::PluginArchive {
            $constructor()
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginContext;
    use crate::symbol::SymbolBuilder;

    #[derive(Debug)]
    struct Noop;

    impl Plugin for Noop {
        fn start(&mut self, _ctx: &PluginContext) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self, _ctx: &PluginContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_archive_builder() {
        let archive = PluginArchive::builder()
            .symbol(SymbolBuilder::new("a::One", |_| Ok(1u8)).component().build())
            .symbol(SymbolBuilder::new("a::Two", |_| Ok(2u8)).build())
            .symbol(SymbolBuilder::new("a::One", |_| Ok(3u8)).build())
            .resource("static/index.html", "<h1>hi</h1>")
            .entry("a::Plugin", || Ok(Box::new(Noop) as Box<dyn Plugin>))
            .build();

        let names: Vec<_> = archive.symbols().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a::Two", "a::One"]);
        assert!(!archive.symbol("a::One").unwrap().is_component());
        assert_eq!(
            archive.resource("static/index.html").unwrap(),
            Bytes::from("<h1>hi</h1>")
        );
        assert!(archive.has_entry("a::Plugin"));
        assert!(archive.entry("a::Plugin").is_ok());
        assert!(archive.entry("a::Missing").is_err());
    }

    #[test]
    fn test_entry_factory_panic() {
        let archive = PluginArchive::builder()
            .entry("a::Plugin", || -> Result<Box<dyn Plugin>> { panic!("no entry") })
            .build();
        assert!(matches!(
            archive.entry("a::Plugin"),
            Err(PluginError::Panicked(_))
        ));
    }
}
