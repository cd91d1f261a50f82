//! Runs the sample plugins from their manifests in `plugins/`

use bytes::Bytes;
use plinth_api::PluginState;
use plinth_audit::AuditLog;
use plinth_hello::Greeter;
use plinth_runtime::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

fn plugins_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..")
}

fn manager(host: &InProcessHost) -> PluginLifecycleManager {
    let archives = StaticArchiveLoader::new()
        .with_archive(plinth_hello::PLUGIN_CLASS, plinth_hello::archive)
        .with_archive(plinth_audit::PLUGIN_CLASS, plinth_audit::archive);
    PluginLifecycleManager::builder()
        .config(RuntimeConfig {
            plugins_root: plugins_root(),
            ..RuntimeConfig::default()
        })
        .host(host)
        .archive_loader(Arc::new(archives))
        .build()
        .unwrap()
}

fn get(host: &InProcessHost, uri: &str) -> Bytes {
    let request = http::Request::builder().uri(uri).body(Bytes::new()).unwrap();
    host.routes.dispatch(&request).unwrap().into_body()
}

#[test]
fn test_sample_plugins_start_in_dependency_order() {
    let host = InProcessHost::new();
    let manager = manager(&host);
    manager.load_all().unwrap();
    manager.start_all();

    assert_eq!(manager.started_plugins(), vec!["hello", "audit"]);
    assert_eq!(manager.dependents("hello"), vec!["audit"]);

    let registers: Vec<String> = manager
        .lookup::<dyn Greeter>()
        .iter()
        .map(|g| g.register().to_string())
        .collect();
    assert_eq!(registers, vec!["casual", "formal", "audited"]);

    assert_eq!(get(&host, "/hello?name=Ada"), Bytes::from("Hello, Ada!"));
}

#[test]
fn test_audit_log_sees_later_transitions() {
    let host = InProcessHost::new();
    let manager = manager(&host);
    manager.load_all().unwrap();
    manager.start_all();

    manager.stop("hello", true).unwrap();
    assert_eq!(manager.state("audit").unwrap(), PluginState::Stopped);

    manager.start("audit").unwrap();
    assert_eq!(manager.state("hello").unwrap(), PluginState::Started);

    manager.stop("hello", false).unwrap();
    let log = manager
        .container("audit")
        .unwrap()
        .local_component("audit::AuditLog")
        .and_then(|c| c.downcast::<AuditLog>())
        .unwrap();
    assert!(log
        .entries()
        .iter()
        .any(|e| e.event.plugin_id() == Some("hello")));

    let body: serde_json::Value = serde_json::from_slice(&get(&host, "/audit")).unwrap();
    assert!(!body.as_array().unwrap().is_empty());
}

#[test]
fn test_stop_all_unbinds_every_route() {
    let host = InProcessHost::new();
    let manager = manager(&host);
    manager.load_all().unwrap();
    manager.start_all();
    assert_eq!(host.routes.len(), 2);

    manager.stop_all();
    assert!(host.routes.is_empty());
    assert_eq!(host.events.subscriber_count("audit"), 0);
    assert!(manager.lookup::<dyn Greeter>().is_empty());
}
