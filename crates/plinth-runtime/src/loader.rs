//! Isolated code loading
//!
//! Every resolved plugin gets a [`CodeLoader`] over its archive. Two
//! resolution policies apply:
//!
//! - **Code symbols** are parent-first. The host's [`SharedScope`] is
//!   consulted before anything private, so types crossing the host/plugin
//!   boundary always come from one definition. Then each non-optional
//!   dependency's loader is searched depth-first, and finally the plugin's
//!   own archive.
//! - **Resources** are plugin-first. A private resource shadows a host
//!   resource of the same name; enumeration only includes host resources
//!   whose name matches a shared pattern.

use crate::error::{Result, RuntimeError};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use plinth_api::{PluginArchive, PluginDescriptor, Resource, ResourceOrigin, Symbol};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Where a symbol was resolved from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolOrigin {
    /// The host's shared scope
    Host,

    /// A plugin archive (the requesting plugin or one of its dependencies)
    Plugin(String),
}

/// A symbol together with where it was found
#[derive(Debug, Clone)]
pub struct ResolvedSymbol {
    /// The symbol
    pub symbol: Arc<Symbol>,

    /// Origin of the definition
    pub origin: SymbolOrigin,
}

/// Host symbols and resources visible to every plugin
#[derive(Debug, Default)]
pub struct SharedScope {
    symbols: DashMap<String, Arc<Symbol>>,
    resources: DashMap<String, Bytes>,
}

impl SharedScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a host symbol
    pub fn register_symbol(&self, symbol: Symbol) {
        self.symbols
            .insert(symbol.name().to_string(), Arc::new(symbol));
    }

    /// Share a host resource
    pub fn register_resource(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.resources.insert(name.into(), data.into());
    }

    /// Look up a host symbol
    pub fn symbol(&self, name: &str) -> Option<Arc<Symbol>> {
        self.symbols.get(name).map(|s| s.value().clone())
    }

    /// Look up a host resource
    pub fn resource(&self, name: &str) -> Option<Bytes> {
        self.resources.get(name).map(|r| r.value().clone())
    }

    /// Host resource names starting with `prefix`
    pub fn resource_names(&self, prefix: &str) -> Vec<String> {
        self.resources
            .iter()
            .filter(|r| r.key().starts_with(prefix))
            .map(|r| r.key().clone())
            .collect()
    }
}

/// Resource names that may be enumerated across the host boundary
#[derive(Debug, Clone, Default)]
pub struct SharedResourcePolicy {
    patterns: Vec<Regex>,
}

impl SharedResourcePolicy {
    /// Compile glob patterns (`*` matches any run of characters, `?` one character)
    pub fn from_globs<S: AsRef<str>>(globs: &[S]) -> Result<Self> {
        let patterns = globs
            .iter()
            .map(|glob| {
                let glob = glob.as_ref();
                let mut pattern = String::with_capacity(glob.len() + 8);
                pattern.push('^');
                for c in glob.chars() {
                    match c {
                        '*' => pattern.push_str(".*"),
                        '?' => pattern.push('.'),
                        c => pattern.push_str(&regex::escape(&c.to_string())),
                    }
                }
                pattern.push('$');
                Regex::new(&pattern)
                    .map_err(|e| RuntimeError::config(format!("invalid shared resource '{glob}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether `name` is shared
    pub fn is_shared(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(name))
    }
}

type LoaderTable = DashMap<String, Arc<CodeLoader>>;

/// Per-plugin code loader
pub struct CodeLoader {
    plugin_id: String,
    archive: Arc<PluginArchive>,
    dependencies: Vec<String>,
    shared: Arc<SharedScope>,
    policy: Arc<SharedResourcePolicy>,
    table: Weak<LoaderTable>,
    cache: RwLock<HashMap<String, ResolvedSymbol>>,
}

impl CodeLoader {
    /// Owning plugin id
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// The plugin's archive
    pub fn archive(&self) -> &Arc<PluginArchive> {
        &self.archive
    }

    /// Names of the symbols packaged in the plugin's own archive
    pub fn symbol_names(&self) -> Vec<String> {
        self.archive
            .symbols()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Resolve a code symbol: cache, host, dependencies, then own archive
    pub fn load_symbol(&self, name: &str) -> Option<ResolvedSymbol> {
        if let Some(hit) = self.cache.read().get(name) {
            return Some(hit.clone());
        }

        let resolved = match self.shared.symbol(name) {
            Some(symbol) => Some(ResolvedSymbol {
                symbol,
                origin: SymbolOrigin::Host,
            }),
            None => {
                let mut visited = HashSet::new();
                visited.insert(self.plugin_id.clone());
                self.find_private(name, &mut visited)
            }
        }?;

        debug!(
            plugin = %self.plugin_id,
            symbol = %name,
            origin = ?resolved.origin,
            "Resolved symbol"
        );
        self.cache.write().insert(name.to_string(), resolved.clone());
        Some(resolved)
    }

    // No lock is held while descending: dependency loaders are cloned out of
    // the table first, and `visited` stops cycles between loaders.
    fn find_private(&self, name: &str, visited: &mut HashSet<String>) -> Option<ResolvedSymbol> {
        for dependency in &self.dependencies {
            if !visited.insert(dependency.clone()) {
                continue;
            }
            let Some(loader) = self.dependency_loader(dependency) else {
                continue;
            };
            if let Some(found) = loader.find_private(name, visited) {
                return Some(found);
            }
        }

        self.archive.symbol(name).map(|symbol| ResolvedSymbol {
            symbol,
            origin: SymbolOrigin::Plugin(self.plugin_id.clone()),
        })
    }

    fn dependency_loader(&self, plugin_id: &str) -> Option<Arc<CodeLoader>> {
        let table = self.table.upgrade()?;
        let loader = table.get(plugin_id).map(|l| l.value().clone());
        loader
    }

    /// Find a resource: own archive first, then the host
    pub fn resource(&self, name: &str) -> Option<Resource> {
        if let Some(data) = self.archive.resource(name) {
            return Some(Resource {
                name: name.to_string(),
                origin: ResourceOrigin::Plugin(self.plugin_id.clone()),
                data,
            });
        }
        self.shared.resource(name).map(|data| Resource {
            name: name.to_string(),
            origin: ResourceOrigin::Host,
            data,
        })
    }

    /// Every resource named `name`: own archive, plus the host copy when shared
    pub fn resources(&self, name: &str) -> Vec<Resource> {
        let mut found = Vec::new();
        if let Some(data) = self.archive.resource(name) {
            found.push(Resource {
                name: name.to_string(),
                origin: ResourceOrigin::Plugin(self.plugin_id.clone()),
                data,
            });
        }
        if self.policy.is_shared(name) {
            if let Some(data) = self.shared.resource(name) {
                found.push(Resource {
                    name: name.to_string(),
                    origin: ResourceOrigin::Host,
                    data,
                });
            }
        }
        found
    }

    /// Resource names under `prefix`: own archive, plus shared host names
    pub fn resource_names(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .archive
            .resource_names()
            .filter(|n| n.starts_with(prefix))
            .map(str::to_string)
            .collect();
        for name in self.shared.resource_names(prefix) {
            if self.policy.is_shared(&name) && !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    /// Drop cached resolutions that came from `plugin_id`
    pub fn evict_origin(&self, plugin_id: &str) {
        self.cache
            .write()
            .retain(|_, r| r.origin != SymbolOrigin::Plugin(plugin_id.to_string()));
    }
}

impl fmt::Debug for CodeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeLoader")
            .field("plugin_id", &self.plugin_id)
            .field("dependencies", &self.dependencies)
            .field("cached", &self.cache.read().len())
            .finish()
    }
}

/// Owns the code loader of every resolved plugin
#[derive(Debug)]
pub struct LoaderRegistry {
    loaders: Arc<LoaderTable>,
    shared: Arc<SharedScope>,
    policy: Arc<SharedResourcePolicy>,
}

impl LoaderRegistry {
    /// Create a registry over the host scope
    pub fn new(shared: Arc<SharedScope>, policy: SharedResourcePolicy) -> Self {
        Self {
            loaders: Arc::new(DashMap::new()),
            shared,
            policy: Arc::new(policy),
        }
    }

    /// Host scope consulted first by every loader
    pub fn shared(&self) -> &Arc<SharedScope> {
        &self.shared
    }

    /// Create (or replace) the loader of a plugin
    pub fn create(&self, descriptor: &PluginDescriptor, archive: PluginArchive) -> Arc<CodeLoader> {
        let loader = Arc::new(CodeLoader {
            plugin_id: descriptor.id.clone(),
            archive: Arc::new(archive),
            dependencies: descriptor
                .required_dependencies()
                .map(|d| d.plugin_id.clone())
                .collect(),
            shared: self.shared.clone(),
            policy: self.policy.clone(),
            table: Arc::downgrade(&self.loaders),
            cache: RwLock::new(HashMap::new()),
        });
        if self
            .loaders
            .insert(descriptor.id.clone(), loader.clone())
            .is_some()
        {
            self.evict(&descriptor.id);
        }
        loader
    }

    /// Loader of a plugin
    pub fn get(&self, plugin_id: &str) -> Result<Arc<CodeLoader>> {
        self.loaders
            .get(plugin_id)
            .map(|l| l.value().clone())
            .ok_or_else(|| RuntimeError::not_found(format!("code loader for '{plugin_id}'")))
    }

    /// Whether a plugin has a loader
    pub fn contains(&self, plugin_id: &str) -> bool {
        self.loaders.contains_key(plugin_id)
    }

    /// Remove a plugin's loader and every cached resolution pointing into it
    pub fn remove(&self, plugin_id: &str) -> Option<Arc<CodeLoader>> {
        let removed = self.loaders.remove(plugin_id).map(|(_, l)| l);
        if removed.is_some() {
            self.evict(plugin_id);
        }
        removed
    }

    fn evict(&self, plugin_id: &str) {
        let loaders: Vec<_> = self.loaders.iter().map(|l| l.value().clone()).collect();
        for loader in loaders {
            loader.evict_origin(plugin_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_api::{PluginDependency, SymbolBuilder};

    fn symbol(name: &str, value: u32) -> Symbol {
        SymbolBuilder::new(name, move |_| Ok(value)).component().build()
    }

    fn registry(shared: SharedScope, globs: &[&str]) -> LoaderRegistry {
        LoaderRegistry::new(Arc::new(shared), SharedResourcePolicy::from_globs(globs).unwrap())
    }

    #[test]
    fn test_parent_first_symbols() {
        let shared = SharedScope::new();
        shared.register_symbol(symbol("api::Greeter", 0));
        let registry = registry(shared, &[]);

        let archive = PluginArchive::builder()
            .symbol(symbol("api::Greeter", 1))
            .symbol(symbol("a::Local", 2))
            .build();
        let loader = registry.create(&PluginDescriptor::new("a", "1.0.0", "a::A"), archive);

        assert_eq!(loader.load_symbol("api::Greeter").unwrap().origin, SymbolOrigin::Host);
        assert_eq!(
            loader.load_symbol("a::Local").unwrap().origin,
            SymbolOrigin::Plugin("a".into())
        );
        assert!(loader.load_symbol("a::Missing").is_none());
    }

    #[test]
    fn test_dependency_search_is_depth_first() {
        let registry = registry(SharedScope::new(), &[]);

        registry.create(
            &PluginDescriptor::new("base", "1.0.0", "base::B"),
            PluginArchive::builder().symbol(symbol("shared::Model", 1)).build(),
        );
        registry.create(
            &PluginDescriptor::new("mid", "1.0.0", "mid::M")
                .with_dependency(PluginDependency::required("base")),
            PluginArchive::builder().symbol(symbol("shared::Model", 2)).build(),
        );
        registry.create(
            &PluginDescriptor::new("opt", "1.0.0", "opt::O"),
            PluginArchive::builder().symbol(symbol("opt::Only", 3)).build(),
        );
        let top = registry.create(
            &PluginDescriptor::new("top", "1.0.0", "top::T")
                .with_dependency(PluginDependency::required("mid"))
                .with_dependency(PluginDependency::optional("opt")),
            PluginArchive::builder().symbol(symbol("shared::Model", 3)).build(),
        );

        let resolved = top.load_symbol("shared::Model").unwrap();
        assert_eq!(resolved.origin, SymbolOrigin::Plugin("base".into()));
        assert!(top.load_symbol("opt::Only").is_none());
    }

    #[test]
    fn test_dependency_cycle_terminates() {
        let registry = registry(SharedScope::new(), &[]);
        let a = registry.create(
            &PluginDescriptor::new("a", "1.0.0", "a::A")
                .with_dependency(PluginDependency::required("b")),
            PluginArchive::default(),
        );
        registry.create(
            &PluginDescriptor::new("b", "1.0.0", "b::B")
                .with_dependency(PluginDependency::required("a")),
            PluginArchive::default(),
        );
        assert!(a.load_symbol("nowhere").is_none());
    }

    #[test]
    fn test_remove_evicts_cached_symbols() {
        let registry = registry(SharedScope::new(), &[]);
        registry.create(
            &PluginDescriptor::new("base", "1.0.0", "base::B"),
            PluginArchive::builder().symbol(symbol("base::Thing", 1)).build(),
        );
        let user = registry.create(
            &PluginDescriptor::new("user", "1.0.0", "user::U")
                .with_dependency(PluginDependency::required("base")),
            PluginArchive::default(),
        );

        assert!(user.load_symbol("base::Thing").is_some());
        registry.remove("base");
        assert!(user.load_symbol("base::Thing").is_none());
        assert!(registry.get("base").is_err());
    }

    #[test]
    fn test_resources_plugin_first() {
        let shared = SharedScope::new();
        shared.register_resource("index.html", "host");
        shared.register_resource("i18n/messages.properties", "host-messages");
        shared.register_resource("secret.txt", "host-secret");
        let registry = registry(shared, &["i18n/*"]);

        let archive = PluginArchive::builder()
            .resource("index.html", "plugin")
            .resource("i18n/messages.properties", "plugin-messages")
            .build();
        let loader = registry.create(&PluginDescriptor::new("a", "1.0.0", "a::A"), archive);

        let index = loader.resource("index.html").unwrap();
        assert_eq!(index.origin, ResourceOrigin::Plugin("a".into()));
        assert_eq!(index.data, Bytes::from("plugin"));
        assert_eq!(loader.resource("secret.txt").unwrap().origin, ResourceOrigin::Host);

        assert_eq!(loader.resources("index.html").len(), 1);
        assert_eq!(loader.resources("secret.txt").len(), 0);
        let messages = loader.resources("i18n/messages.properties");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].origin, ResourceOrigin::Host);

        assert_eq!(loader.resource_names("i18n/"), vec!["i18n/messages.properties"]);
    }

    #[test]
    fn test_glob_policy() {
        let policy = SharedResourcePolicy::from_globs(&["static/*.css", "lang_??.json"]).unwrap();
        assert!(policy.is_shared("static/site.css"));
        assert!(!policy.is_shared("static/site.js"));
        assert!(policy.is_shared("lang_en.json"));
        assert!(!policy.is_shared("lang_eng.json"));
    }
}
