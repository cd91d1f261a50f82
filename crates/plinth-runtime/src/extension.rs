//! Extension point lookup cache
//!
//! Lookups are served from a per-extension-point snapshot built from the
//! discovery engine's ownership index. Entries are sorted by ordinal
//! (highest first), ties broken by symbol name, and are rebuilt lazily after
//! [`ExtensionPointCache::invalidate`]. A returned [`ExtensionList`] is an
//! owned snapshot and never changes after the fact.

use crate::discovery::{ExtensionDiscoveryEngine, RegisteredExtension};
use parking_lot::{Mutex, RwLock};
use plinth_api::symbol::ExtensionPointId;
use plinth_api::{Component, Symbol};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct CachedExtension {
    plugin_id: String,
    symbol: Arc<Symbol>,
    ordinal: i32,
    component: Component,
}

impl From<RegisteredExtension> for CachedExtension {
    fn from(registered: RegisteredExtension) -> Self {
        Self {
            ordinal: registered.ordinal(),
            plugin_id: registered.descriptor.plugin_id,
            symbol: registered.descriptor.symbol,
            component: registered.component,
        }
    }
}

fn sorted(registered: Vec<RegisteredExtension>) -> Vec<CachedExtension> {
    let mut entries: Vec<CachedExtension> = registered.into_iter().map(Into::into).collect();
    entries.sort_by(|a, b| {
        b.ordinal
            .cmp(&a.ordinal)
            .then_with(|| a.symbol.name().cmp(b.symbol.name()))
    });
    entries
}

/// Lazily built, priority sorted views of registered extensions
#[derive(Debug)]
pub struct ExtensionPointCache {
    engine: Arc<ExtensionDiscoveryEngine>,
    entries: RwLock<HashMap<ExtensionPointId, Arc<Vec<CachedExtension>>>>,
    rebuild: Mutex<()>,
    generation: AtomicU64,
    rebuilds: AtomicU64,
}

impl ExtensionPointCache {
    /// Create a cache over the engine's ownership index
    pub fn new(engine: Arc<ExtensionDiscoveryEngine>) -> Self {
        Self {
            engine,
            entries: RwLock::new(HashMap::new()),
            rebuild: Mutex::new(()),
            generation: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Implementations of `E` from every started plugin
    pub fn lookup<E: ?Sized + Send + Sync + 'static>(&self) -> ExtensionList<E> {
        let point = ExtensionPointId::of::<E>();
        ExtensionList::from_cached(point, &self.entries(point))
    }

    /// Implementations of `E` owned by one plugin (not cached)
    pub fn lookup_in<E: ?Sized + Send + Sync + 'static>(&self, plugin_id: &str) -> ExtensionList<E> {
        let point = ExtensionPointId::of::<E>();
        ExtensionList::from_cached(point, &sorted(self.engine.implementations_in(plugin_id, point)))
    }

    /// Drop every cached entry
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.write().clear();
        debug!("Invalidated extension point cache");
    }

    /// Number of extension points currently cached
    pub fn cached_points(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of snapshots built since creation
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    fn entries(&self, point: ExtensionPointId) -> Arc<Vec<CachedExtension>> {
        if let Some(hit) = self.entries.read().get(&point) {
            return hit.clone();
        }

        let _rebuilding = self.rebuild.lock();
        if let Some(hit) = self.entries.read().get(&point) {
            return hit.clone();
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let built = self.build(point);
        self.publish(point, generation, built)
    }

    fn build(&self, point: ExtensionPointId) -> Arc<Vec<CachedExtension>> {
        let built = Arc::new(sorted(self.engine.implementations(point)));
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        debug!(point = %point, extensions = built.len(), "Rebuilt extension point entry");
        built
    }

    /// Cache `built` unless the cache was invalidated since `generation`
    fn publish(
        &self,
        point: ExtensionPointId,
        generation: u64,
        built: Arc<Vec<CachedExtension>>,
    ) -> Arc<Vec<CachedExtension>> {
        // A stale snapshot may hold stopped plugins; hand it out once but do
        // not cache it.
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            entries.insert(point, built.clone());
        }
        built
    }
}

/// One implementation in an [`ExtensionList`]
pub struct ExtensionItem<E: ?Sized> {
    /// Owning plugin
    pub plugin_id: String,
    /// Implementing symbol name
    pub symbol_name: String,
    /// Priority ordinal
    pub ordinal: i32,
    /// The implementation
    pub instance: Arc<E>,
}

impl<E: ?Sized> Clone for ExtensionItem<E> {
    fn clone(&self) -> Self {
        Self {
            plugin_id: self.plugin_id.clone(),
            symbol_name: self.symbol_name.clone(),
            ordinal: self.ordinal,
            instance: self.instance.clone(),
        }
    }
}

impl<E: ?Sized> fmt::Debug for ExtensionItem<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionItem")
            .field("plugin_id", &self.plugin_id)
            .field("symbol_name", &self.symbol_name)
            .field("ordinal", &self.ordinal)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the implementations of an extension point, highest priority first
pub struct ExtensionList<E: ?Sized> {
    items: Vec<ExtensionItem<E>>,
}

impl<E: ?Sized + Send + Sync + 'static> ExtensionList<E> {
    fn from_cached(point: ExtensionPointId, cached: &[CachedExtension]) -> Self {
        let items = cached
            .iter()
            .filter_map(|entry| {
                let instance = entry
                    .symbol
                    .extension_point(point)?
                    .cast::<E>(entry.component.instance())?;
                Some(ExtensionItem {
                    plugin_id: entry.plugin_id.clone(),
                    symbol_name: entry.symbol.name().to_string(),
                    ordinal: entry.ordinal,
                    instance,
                })
            })
            .collect();
        Self { items }
    }
}

impl<E: ?Sized> ExtensionList<E> {
    /// Iterate over the implementations
    pub fn iter(&self) -> impl Iterator<Item = &Arc<E>> + '_ {
        self.items.iter().map(|item| &item.instance)
    }

    /// Implementation at `index`
    pub fn get(&self, index: usize) -> Option<&Arc<E>> {
        self.items.get(index).map(|item| &item.instance)
    }

    /// Number of implementations
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there is no implementation
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Implementations with their owner, symbol and ordinal
    pub fn components(&self) -> &[ExtensionItem<E>] {
        &self.items
    }

    /// The implementation provided by exactly `symbol_name`
    pub fn by_symbol(&self, symbol_name: &str) -> Option<&Arc<E>> {
        self.items
            .iter()
            .find(|item| item.symbol_name == symbol_name)
            .map(|item| &item.instance)
    }

    /// Lowest priority first
    pub fn reversed(mut self) -> Self {
        self.items.reverse();
        self
    }
}

impl<E: ?Sized> Clone for ExtensionList<E> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<E: ?Sized> fmt::Debug for ExtensionList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl<E: ?Sized> IntoIterator for ExtensionList<E> {
    type Item = Arc<E>;
    type IntoIter = std::iter::Map<std::vec::IntoIter<ExtensionItem<E>>, fn(ExtensionItem<E>) -> Arc<E>>;

    fn into_iter(self) -> Self::IntoIter {
        let instance: fn(ExtensionItem<E>) -> Arc<E> = |item| item.instance;
        self.items.into_iter().map(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ModuleContainerRegistry;
    use crate::host::RootContainer;
    use crate::loader::{LoaderRegistry, SharedResourcePolicy, SharedScope};
    use plinth_api::{PluginArchive, PluginDescriptor, SymbolBuilder};
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;

    trait Named: Send + Sync {
        fn name(&self) -> &'static str;
    }

    macro_rules! named {
        ($ty:ident) => {
            struct $ty;
            impl Named for $ty {
                fn name(&self) -> &'static str {
                    stringify!($ty)
                }
            }
        };
    }

    named!(A);
    named!(B);
    named!(C);

    struct Fixture {
        loaders: LoaderRegistry,
        containers: ModuleContainerRegistry,
        engine: Arc<ExtensionDiscoveryEngine>,
        cache: ExtensionPointCache,
    }

    impl Fixture {
        fn new() -> Self {
            let engine = Arc::new(ExtensionDiscoveryEngine::default());
            Self {
                loaders: LoaderRegistry::new(Arc::new(SharedScope::new()), SharedResourcePolicy::default()),
                containers: ModuleContainerRegistry::new(Arc::new(RootContainer::new())),
                cache: ExtensionPointCache::new(engine.clone()),
                engine,
            }
        }

        fn start(&self, plugin_id: &str, archive: PluginArchive) {
            let loader = self
                .loaders
                .create(&PluginDescriptor::new(plugin_id, "1.0.0", "x::X"), archive);
            let container = self.containers.create(plugin_id, loader);
            self.engine.register_all(plugin_id, &container).unwrap();
            self.cache.invalidate();
        }

        fn stop(&self, plugin_id: &str) {
            let container = self.containers.get(plugin_id).unwrap();
            self.engine.unregister_all(plugin_id, Some(container.as_ref()));
            self.containers.destroy(plugin_id);
            self.cache.invalidate();
        }
    }

    fn names(list: &ExtensionList<dyn Named>) -> Vec<&'static str> {
        list.iter().map(|n| n.name()).collect()
    }

    #[test]
    fn test_priority_then_name_ordering() {
        let fixture = Fixture::new();
        fixture.start(
            "p",
            PluginArchive::builder()
                .symbol(SymbolBuilder::new("B", |_| Ok(B)).extension(5).implements::<dyn Named>(|x| x).build())
                .symbol(SymbolBuilder::new("C", |_| Ok(C)).extension(10).implements::<dyn Named>(|x| x).build())
                .symbol(SymbolBuilder::new("A", |_| Ok(A)).extension(10).implements::<dyn Named>(|x| x).build())
                .build(),
        );

        let list = fixture.cache.lookup::<dyn Named>();
        assert_eq!(names(&list), vec!["A", "C", "B"]);
        assert_eq!(list.components()[2].ordinal, 5);
        assert_eq!(list.by_symbol("C").unwrap().name(), "C");
        assert_eq!(names(&list.clone().reversed()), vec!["B", "C", "A"]);
        assert_eq!(fixture.cache.cached_points(), 1);
    }

    #[test]
    fn test_snapshot_and_invalidation() {
        let fixture = Fixture::new();
        fixture.start(
            "a",
            PluginArchive::builder()
                .symbol(SymbolBuilder::new("a::A", |_| Ok(A)).extension(1).implements::<dyn Named>(|x| x).build())
                .build(),
        );
        let before = fixture.cache.lookup::<dyn Named>();

        fixture.start(
            "b",
            PluginArchive::builder()
                .symbol(SymbolBuilder::new("b::B", |_| Ok(B)).extension(2).implements::<dyn Named>(|x| x).build())
                .build(),
        );
        assert_eq!(before.len(), 1);
        assert_eq!(names(&fixture.cache.lookup::<dyn Named>()), vec!["B", "A"]);
        assert_eq!(fixture.cache.lookup_in::<dyn Named>("a").len(), 1);

        fixture.stop("b");
        assert_eq!(names(&fixture.cache.lookup::<dyn Named>()), vec!["A"]);
        assert!(fixture.cache.lookup_in::<dyn Named>("b").is_empty());
    }

    fn a_archive() -> PluginArchive {
        PluginArchive::builder()
            .symbol(SymbolBuilder::new("a::A", |_| Ok(A)).extension(1).implements::<dyn Named>(|x| x).build())
            .build()
    }

    fn b_archive() -> PluginArchive {
        PluginArchive::builder()
            .symbol(SymbolBuilder::new("b::B", |_| Ok(B)).extension(2).implements::<dyn Named>(|x| x).build())
            .build()
    }

    #[test]
    fn test_stale_snapshot_is_not_cached() {
        let fixture = Fixture::new();
        fixture.start("a", a_archive());
        fixture.start("b", b_archive());
        let point = ExtensionPointId::of::<dyn Named>();

        let generation = fixture.cache.generation.load(Ordering::SeqCst);
        let built = fixture.cache.build(point);
        fixture.stop("b");

        let handed_out = fixture.cache.publish(point, generation, built);
        assert_eq!(handed_out.len(), 2);
        assert_eq!(fixture.cache.cached_points(), 0);
        assert_eq!(names(&fixture.cache.lookup::<dyn Named>()), vec!["A"]);
        assert_eq!(fixture.cache.cached_points(), 1);
    }

    #[test]
    fn test_concurrent_lookups_rebuild_once() {
        let fixture = Fixture::new();
        fixture.start("a", a_archive());
        fixture.start("b", b_archive());
        let before = fixture.cache.rebuilds();
        let barrier = Barrier::new(8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    barrier.wait();
                    assert_eq!(names(&fixture.cache.lookup::<dyn Named>()), vec!["B", "A"]);
                });
            }
        });

        assert_eq!(fixture.cache.rebuilds(), before + 1);
    }

    #[test]
    fn test_lookups_during_restarts_see_whole_snapshots() {
        let fixture = Fixture::new();
        fixture.start("a", a_archive());
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::SeqCst) {
                        let seen = names(&fixture.cache.lookup::<dyn Named>());
                        assert!(
                            seen == vec!["A"] || seen == vec!["B", "A"],
                            "unexpected snapshot {seen:?}"
                        );
                    }
                });
            }

            for _ in 0..50 {
                fixture.start("b", b_archive());
                fixture.stop("b");
            }
            done.store(true, Ordering::SeqCst);
        });

        assert_eq!(names(&fixture.cache.lookup::<dyn Named>()), vec!["A"]);
    }

    #[test]
    fn test_unknown_point_is_empty() {
        trait Unused: Send + Sync {}
        let fixture = Fixture::new();
        assert!(fixture.cache.lookup::<dyn Unused>().is_empty());
    }
}
