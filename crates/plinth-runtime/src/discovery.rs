//! Extension discovery and registration
//!
//! The engine walks a plugin's archive through its [`CodeLoader`], keeps the
//! symbols that carry capability markers, classifies them by role and
//! registers one instance of each into the plugin's module container. What
//! was registered is tracked in an ownership index keyed by plugin id, which
//! is the source of truth for extension lookups, route binding and event
//! subscription.

use crate::container::ModuleContainer;
use crate::error::{Result, RuntimeError};
use crate::loader::{CodeLoader, SymbolOrigin};
use parking_lot::RwLock;
use plinth_api::symbol::ExtensionPointId;
use plinth_api::{Component, ComponentContainer, InjectionContext, Symbol};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Roles a discovered symbol plays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Roles {
    /// Serves routes through the host route table
    pub external_handler: bool,
    /// Declares event listener methods
    pub event_subscriber: bool,
    /// Implements at least one extension point
    pub extension_point_impl: bool,
    /// Registered as a plain component
    pub plain_component: bool,
}

impl Roles {
    /// Whether no role is set
    pub fn is_empty(&self) -> bool {
        !(self.external_handler
            || self.event_subscriber
            || self.extension_point_impl
            || self.plain_component)
    }
}

impl fmt::Display for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.external_handler, "handler"),
            (self.event_subscriber, "subscriber"),
            (self.extension_point_impl, "extension"),
            (self.plain_component, "component"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();
        f.write_str(&names.join("+"))
    }
}

/// A symbol selected for registration
#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    /// Owning plugin
    pub plugin_id: String,
    /// The symbol
    pub symbol: Arc<Symbol>,
    /// Name the instance is registered under
    pub component_name: String,
    /// Classified roles
    pub roles: Roles,
    /// Where the symbol was resolved from
    pub origin: SymbolOrigin,
}

/// Decides which roles a symbol plays; `None` skips it
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Classify a symbol
    fn classify(&self, symbol: &Symbol) -> Option<Roles>;
}

/// Classifies symbols from their capability markers
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerClassifier;

impl Classifier for MarkerClassifier {
    fn classify(&self, symbol: &Symbol) -> Option<Roles> {
        if !symbol.is_marked() {
            return None;
        }

        let mut roles = Roles {
            external_handler: symbol.is_handler(),
            event_subscriber: !symbol.listeners().is_empty(),
            extension_point_impl: symbol.extension_ordinal().is_some()
                && !symbol.extension_points().is_empty(),
            plain_component: symbol.is_component(),
        };
        if roles.is_empty() {
            roles.plain_component = true;
        }
        Some(roles)
    }
}

/// A registered instance and the descriptor it came from
#[derive(Debug, Clone)]
pub struct RegisteredExtension {
    /// Discovery descriptor
    pub descriptor: ExtensionDescriptor,
    /// Live component
    pub component: Component,
}

impl RegisteredExtension {
    /// Priority ordinal, 0 for unmarked extensions
    pub fn ordinal(&self) -> i32 {
        self.descriptor.symbol.extension_ordinal().unwrap_or(0)
    }

    /// Whether the instance implements `point`
    pub fn implements(&self, point: ExtensionPointId) -> bool {
        self.descriptor.roles.extension_point_impl
            && self.descriptor.symbol.extension_point(point).is_some()
    }
}

/// Discovers, registers and tracks plugin extensions
#[derive(Debug)]
pub struct ExtensionDiscoveryEngine {
    classifier: Arc<dyn Classifier>,
    owned: RwLock<HashMap<String, Vec<RegisteredExtension>>>,
}

impl Default for ExtensionDiscoveryEngine {
    fn default() -> Self {
        Self::new(Arc::new(MarkerClassifier))
    }
}

impl ExtensionDiscoveryEngine {
    /// Create an engine using `classifier`
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            owned: RwLock::new(HashMap::new()),
        }
    }

    /// Classify the marked symbols of a plugin's own archive
    ///
    /// Symbols shadowed by a host or dependency definition of the same name
    /// are skipped: they belong to whoever defines them.
    pub fn discover(&self, loader: &CodeLoader) -> Vec<ExtensionDescriptor> {
        let plugin_id = loader.plugin_id();
        let own = SymbolOrigin::Plugin(plugin_id.to_string());

        loader
            .symbol_names()
            .into_iter()
            .filter_map(|name| {
                let resolved = loader.load_symbol(&name)?;
                if resolved.origin != own {
                    debug!(
                        plugin = %plugin_id,
                        symbol = %name,
                        origin = ?resolved.origin,
                        "Skipping shadowed symbol"
                    );
                    return None;
                }
                let roles = self.classifier.classify(&resolved.symbol)?;
                Some(ExtensionDescriptor {
                    plugin_id: plugin_id.to_string(),
                    component_name: resolved.symbol.name().to_string(),
                    symbol: resolved.symbol,
                    roles,
                    origin: resolved.origin,
                })
            })
            .collect()
    }

    /// Instantiate and register every discovered extension of a plugin
    ///
    /// A plugin that is already registered is left untouched. Symbols whose
    /// component name is already present in the container are not
    /// instantiated again; distinct symbols built on one type all register.
    /// On failure the instances registered so far stay indexed, so
    /// [`ExtensionDiscoveryEngine::unregister_all`] can tear them down.
    pub fn register_all(&self, plugin_id: &str, container: &ModuleContainer) -> Result<Vec<ExtensionDescriptor>> {
        if let Some(existing) = self.owned.read().get(plugin_id) {
            debug!(plugin = %plugin_id, "Extensions already registered");
            return Ok(existing.iter().map(|r| r.descriptor.clone()).collect());
        }

        let ctx = InjectionContext::new(plugin_id, container);
        let mut registered = Vec::new();
        let mut failure = None;

        for descriptor in self.discover(container.loader()) {
            if container.local_component(&descriptor.component_name).is_some() {
                debug!(
                    plugin = %plugin_id,
                    symbol = %descriptor.symbol.name(),
                    "Component already present"
                );
                continue;
            }

            let component = match descriptor
                .symbol
                .instantiate(&ctx)
                .and_then(|c| container.register_component(c.clone()).map(|_| c))
            {
                Ok(component) => component,
                Err(e) => {
                    failure = Some(RuntimeError::start(
                        plugin_id,
                        format!("cannot register '{}': {e}", descriptor.component_name),
                    ));
                    break;
                }
            };

            debug!(
                plugin = %plugin_id,
                component = %descriptor.component_name,
                roles = %descriptor.roles,
                "Registered extension"
            );
            registered.push(RegisteredExtension {
                descriptor,
                component,
            });
        }

        let descriptors: Vec<_> = registered.iter().map(|r| r.descriptor.clone()).collect();
        self.owned.write().insert(plugin_id.to_string(), registered);

        match failure {
            Some(e) => Err(e),
            None => {
                info!(plugin = %plugin_id, extensions = descriptors.len(), "Registered extensions");
                Ok(descriptors)
            }
        }
    }

    /// Drop every extension owned by a plugin, destroying the instances in `container`
    ///
    /// Unknown plugins yield an empty list. Teardown failures are logged.
    pub fn unregister_all(
        &self,
        plugin_id: &str,
        container: Option<&dyn ComponentContainer>,
    ) -> Vec<ExtensionDescriptor> {
        let Some(registered) = self.owned.write().remove(plugin_id) else {
            return Vec::new();
        };

        if let Some(container) = container {
            for extension in registered.iter().rev() {
                if let Err(e) = container.destroy_component(&extension.descriptor.component_name) {
                    warn!(
                        plugin = %plugin_id,
                        component = %extension.descriptor.component_name,
                        error = %e,
                        "Extension teardown failed"
                    );
                }
            }
        }

        info!(plugin = %plugin_id, extensions = registered.len(), "Unregistered extensions");
        registered.into_iter().map(|r| r.descriptor).collect()
    }

    /// Descriptors owned by a plugin
    pub fn owned_by(&self, plugin_id: &str) -> Vec<ExtensionDescriptor> {
        self.owned
            .read()
            .get(plugin_id)
            .map(|r| r.iter().map(|e| e.descriptor.clone()).collect())
            .unwrap_or_default()
    }

    /// Whether a plugin has registered extensions
    pub fn is_registered(&self, plugin_id: &str) -> bool {
        self.owned.read().contains_key(plugin_id)
    }

    /// Registered extensions of a plugin
    pub fn registered(&self, plugin_id: &str) -> Vec<RegisteredExtension> {
        self.owned.read().get(plugin_id).cloned().unwrap_or_default()
    }

    /// Registered implementations of `point` across all plugins
    pub fn implementations(&self, point: ExtensionPointId) -> Vec<RegisteredExtension> {
        self.owned
            .read()
            .values()
            .flatten()
            .filter(|r| r.implements(point))
            .cloned()
            .collect()
    }

    /// Registered implementations of `point` owned by one plugin
    pub fn implementations_in(&self, plugin_id: &str, point: ExtensionPointId) -> Vec<RegisteredExtension> {
        self.owned
            .read()
            .get(plugin_id)
            .into_iter()
            .flatten()
            .filter(|r| r.implements(point))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ModuleContainerRegistry;
    use crate::host::RootContainer;
    use crate::loader::{LoaderRegistry, SharedResourcePolicy, SharedScope};
    use plinth_api::{PluginArchive, PluginDescriptor, SymbolBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct Tick;

    struct Fixture {
        loaders: LoaderRegistry,
        containers: ModuleContainerRegistry,
    }

    impl Fixture {
        fn new(shared: SharedScope) -> Self {
            Self {
                loaders: LoaderRegistry::new(Arc::new(shared), SharedResourcePolicy::default()),
                containers: ModuleContainerRegistry::new(Arc::new(RootContainer::new())),
            }
        }

        fn container(&self, plugin_id: &str, archive: PluginArchive) -> Arc<ModuleContainer> {
            let loader = self
                .loaders
                .create(&PluginDescriptor::new(plugin_id, "1.0.0", "x::X"), archive);
            self.containers.create(plugin_id, loader)
        }
    }

    fn archive(built: Arc<AtomicUsize>) -> PluginArchive {
        PluginArchive::builder()
            .symbol(
                SymbolBuilder::new("hello::English", move |_| {
                    built.fetch_add(1, Ordering::SeqCst);
                    Ok(English)
                })
                .extension(10)
                .implements::<dyn Greeter>(|g| g)
                .build(),
            )
            .symbol(
                SymbolBuilder::new("hello::Clock", |_| Ok(0u64))
                    .component()
                    .listener("on_tick", |_: &u64, _: &Tick| Ok(()))
                    .build(),
            )
            .symbol(SymbolBuilder::new("hello::Unmarked", |_| Ok(1u8)).build())
            .build()
    }

    #[test]
    fn test_marker_classifier() {
        let classifier = MarkerClassifier;
        let handler = SymbolBuilder::new("h", |_| Ok(0u8)).handler().build();
        let roles = classifier.classify(&handler).unwrap();
        assert!(roles.external_handler && !roles.plain_component);

        let bare_extension = SymbolBuilder::new("e", |_| Ok(0u8)).extension(1).build();
        assert!(classifier.classify(&bare_extension).unwrap().plain_component);

        assert!(classifier
            .classify(&SymbolBuilder::new("u", |_| Ok(0u8)).build())
            .is_none());
    }

    #[test]
    fn test_register_all_is_idempotent() {
        let built = Arc::new(AtomicUsize::new(0));
        let fixture = Fixture::new(SharedScope::new());
        let container = fixture.container("hello", archive(built.clone()));
        let engine = ExtensionDiscoveryEngine::default();

        let first = engine.register_all("hello", &container).unwrap();
        let second = engine.register_all("hello", &container).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(container.len(), 2);
        assert!(engine.is_registered("hello"));
        assert_eq!(
            engine
                .implementations(ExtensionPointId::of::<dyn Greeter>())
                .len(),
            1
        );
    }

    #[test]
    fn test_unregister_all_destroys_components() {
        let fixture = Fixture::new(SharedScope::new());
        let container = fixture.container("hello", archive(Arc::new(AtomicUsize::new(0))));
        let engine = ExtensionDiscoveryEngine::default();
        engine.register_all("hello", &container).unwrap();

        let removed = engine.unregister_all("hello", Some(container.as_ref()));
        assert_eq!(removed.len(), 2);
        assert!(container.is_empty());
        assert!(engine.owned_by("hello").is_empty());
        assert!(engine.unregister_all("hello", None).is_empty());
    }

    #[test]
    fn test_shadowed_symbols_are_skipped() {
        let shared = SharedScope::new();
        shared.register_symbol(SymbolBuilder::new("hello::Clock", |_| Ok(0u64)).component().build());
        let fixture = Fixture::new(shared);
        let container = fixture.container("hello", archive(Arc::new(AtomicUsize::new(0))));

        let engine = ExtensionDiscoveryEngine::default();
        let discovered = engine.discover(container.loader());
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].component_name, "hello::English");
    }

    #[test]
    fn test_symbols_sharing_a_type_all_register() {
        let fixture = Fixture::new(SharedScope::new());
        let container = fixture.container(
            "hello",
            PluginArchive::builder()
                .symbol(
                    SymbolBuilder::new("hello::Casual", |_| Ok(English))
                        .extension(10)
                        .implements::<dyn Greeter>(|g| g)
                        .build(),
                )
                .symbol(
                    SymbolBuilder::new("hello::Formal", |_| Ok(English))
                        .extension(5)
                        .implements::<dyn Greeter>(|g| g)
                        .build(),
                )
                .build(),
        );
        let engine = ExtensionDiscoveryEngine::default();

        let registered = engine.register_all("hello", &container).unwrap();
        assert_eq!(registered.len(), 2);
        assert_eq!(container.len(), 2);
        assert!(container.local_component("hello::Casual").is_some());
        assert!(container.local_component("hello::Formal").is_some());
        assert_eq!(
            engine
                .implementations(ExtensionPointId::of::<dyn Greeter>())
                .len(),
            2
        );
    }

    #[test]
    fn test_failed_registration_keeps_partial_index() {
        let fixture = Fixture::new(SharedScope::new());
        let container = fixture.container(
            "broken",
            PluginArchive::builder()
                .symbol(SymbolBuilder::new("broken::Ok", |_| Ok(1u32)).component().build())
                .symbol(
                    SymbolBuilder::<u16>::new("broken::Bad", |_| {
                        Err(plinth_api::PluginError::component("no database"))
                    })
                    .component()
                    .build(),
                )
                .build(),
        );
        let engine = ExtensionDiscoveryEngine::default();

        let err = engine.register_all("broken", &container).unwrap_err();
        assert!(matches!(err, RuntimeError::PluginStart { .. }));
        assert_eq!(engine.owned_by("broken").len(), 1);
        assert_eq!(engine.unregister_all("broken", Some(container.as_ref())).len(), 1);
        assert!(container.is_empty());
    }
}
