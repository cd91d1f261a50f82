//! Extension lookup benchmarks
//!
//! Run with: cargo bench --package plinth-runtime

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plinth_api::{Plugin, PluginArchive, PluginContext, PluginError, SymbolBuilder};
use plinth_runtime::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

trait Probe: Send + Sync {
    fn weight(&self) -> usize;
}

struct Fixed(usize);

impl Probe for Fixed {
    fn weight(&self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct Noop;

impl Plugin for Noop {
    fn start(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Start `plugins` plugins with `per_plugin` extensions each
fn started_manager(plugins: usize, per_plugin: usize) -> (TempDir, PluginLifecycleManager) {
    let root = tempfile::tempdir().unwrap();
    let archives = StaticArchiveLoader::new();

    for p in 0..plugins {
        let id = format!("bench-{p}");
        let dir = root.path().join(&id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("plugin.toml"),
            format!("id = \"{id}\"\nversion = \"1.0.0\"\nplugin_class = \"{id}::Plugin\"\n"),
        )
        .unwrap();

        let class = format!("{id}::Plugin");
        archives.register(class.clone(), move || {
            let mut builder = PluginArchive::builder();
            for e in 0..per_plugin {
                builder = builder.symbol(
                    SymbolBuilder::new(format!("{id}::Probe{e}"), move |_| Ok(Fixed(e)))
                        .extension(e as i32)
                        .implements::<dyn Probe>(|f| f)
                        .build(),
                );
            }
            builder
                .entry(class.clone(), || Ok(Box::new(Noop) as Box<dyn Plugin>))
                .build()
        });
    }

    let manager = PluginLifecycleManager::builder()
        .config(RuntimeConfig {
            plugins_root: root.path().to_path_buf(),
            ..RuntimeConfig::default()
        })
        .archive_loader(Arc::new(archives))
        .build()
        .unwrap();
    manager.load_all().unwrap();
    manager.start_all();
    (root, manager)
}

fn bench_cached_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_lookup");

    for plugins in [1, 10, 50] {
        let (_root, manager) = started_manager(plugins, 4);
        manager.lookup::<dyn Probe>();

        group.bench_with_input(BenchmarkId::from_parameter(plugins), &plugins, |b, _| {
            b.iter(|| {
                let list = manager.lookup::<dyn Probe>();
                black_box(list.iter().map(|p| p.weight()).sum::<usize>());
            });
        });
    }

    group.finish();
}

fn bench_rebuild_after_invalidation(c: &mut Criterion) {
    let (_root, manager) = started_manager(10, 4);

    c.bench_function("lookup_after_restart", |b| {
        b.iter(|| {
            manager.stop("bench-0", false).unwrap();
            manager.start("bench-0").unwrap();
            black_box(manager.lookup::<dyn Probe>().len());
        });
    });
}

fn bench_lookup_in(c: &mut Criterion) {
    let (_root, manager) = started_manager(10, 4);

    c.bench_function("lookup_in", |b| {
        b.iter(|| black_box(manager.lookup_in::<dyn Probe>(black_box("bench-5")).len()));
    });
}

criterion_group!(
    benches,
    bench_cached_lookup,
    bench_rebuild_after_invalidation,
    bench_lookup_in
);
criterion_main!(benches);
