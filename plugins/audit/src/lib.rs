//! # Audit Plugin
//!
//! Records every lifecycle event published by the runtime and serves the
//! log at `GET /audit`. Depends on the hello plugin and contributes a
//! low-priority [`Greeter`] that tags its greetings.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{Method, Response, StatusCode};
use parking_lot::Mutex;
use plinth_api::prelude::*;
use plinth_hello::Greeter;
use serde::Serialize;
use tracing::{info, warn};

/// Entry point class named by the plugin manifest
pub const PLUGIN_CLASS: &str = "audit::AuditPlugin";

/// Maximum number of entries kept in memory
pub const MAX_ENTRIES: usize = 1024;

/// One recorded lifecycle event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the event was received
    pub at: DateTime<Utc>,

    /// The event
    pub event: LifecycleEvent,
}

/// In-memory audit log
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Record an event, dropping the oldest entry when full
    pub fn record(&self, event: &LifecycleEvent) {
        let mut entries = self.entries.lock();
        if entries.len() == MAX_ENTRIES {
            entries.remove(0);
        }
        entries.push(AuditEntry {
            at: Utc::now(),
            event: event.clone(),
        });
    }

    /// Recorded entries, oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Greeter that marks its greetings as audited
#[derive(Debug)]
pub struct AuditedGreeter;

impl Greeter for AuditedGreeter {
    fn register(&self) -> &str {
        "audited"
    }

    fn greet(&self, name: &str) -> String {
        format!("[audited] hello {name}")
    }
}

/// HTTP handler serving `GET /audit`
#[derive(Debug)]
pub struct AuditApi {
    log: std::sync::Arc<AuditLog>,
}

impl AuditApi {
    fn list(&self, _request: &HandlerRequest) -> Result<HandlerResponse, PluginError> {
        let body = serde_json::to_vec(&self.log.entries())?;
        Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))
            .map_err(PluginError::handler)
    }
}

/// Plugin entry point
#[derive(Debug, Default)]
pub struct AuditPlugin;

impl Plugin for AuditPlugin {
    fn start(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        let log: std::sync::Arc<AuditLog> = ctx.resolve("audit::AuditLog")?;
        info!(plugin = %ctx.plugin_id(), recorded = log.len(), "Audit plugin started");
        Ok(())
    }

    fn stop(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        info!(plugin = %ctx.plugin_id(), "Audit plugin stopped");
        Ok(())
    }
}

/// Package the plugin
pub fn archive() -> PluginArchive {
    PluginArchive::builder()
        .symbol(
            SymbolBuilder::new("audit::AuditLog", |_| Ok(AuditLog::default()))
                .component()
                .listener("on_lifecycle", |log: &AuditLog, event: &LifecycleEvent| {
                    log.record(event);
                    Ok(())
                })
                .on_destroy(|log: &AuditLog| {
                    if !log.is_empty() {
                        warn!(dropped = log.len(), "Audit log discarded on teardown");
                    }
                    Ok(())
                })
                .build(),
        )
        .symbol(
            SymbolBuilder::new("audit::AuditedGreeter", |_| Ok(AuditedGreeter))
                .extension(1)
                .implements::<dyn Greeter>(|g| g)
                .build(),
        )
        .symbol(
            SymbolBuilder::new("audit::AuditApi", |ctx| {
                Ok(AuditApi {
                    log: ctx.resolve("audit::AuditLog")?,
                })
            })
            .handler()
            .route(Method::GET, "/audit", AuditApi::list)
            .build(),
        )
        .entry(PLUGIN_CLASS, || Ok(Box::new(AuditPlugin) as Box<dyn Plugin>))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_api::testing::PluginTestHarness;
    use plinth_api::{ComponentContainer, PluginDescriptor, PluginState};

    #[test]
    fn test_log_is_bounded() {
        let log = AuditLog::default();
        for i in 0..MAX_ENTRIES + 5 {
            log.record(&LifecycleEvent::PluginStarted {
                plugin_id: format!("p{i}"),
            });
        }
        assert_eq!(log.len(), MAX_ENTRIES);
        assert_eq!(
            log.entries()[0].event.plugin_id(),
            Some("p5")
        );
    }

    #[test]
    fn test_listener_records_events() {
        let archive = archive();
        let symbol = archive.symbol("audit::AuditLog").unwrap();
        assert_eq!(symbol.listeners().len(), 1);

        let descriptor = PluginDescriptor::new("audit", "0.1.0", PLUGIN_CLASS);
        let mut harness = PluginTestHarness::new(descriptor, AuditPlugin);
        harness.populate(&archive).unwrap();
        harness.start().unwrap();

        let component = harness.container().resolve_component("audit::AuditLog").unwrap();
        let subscriber = symbol.listeners()[0].subscriber(component.name(), component.instance());
        subscriber
            .deliver(&Event::new(LifecycleEvent::PluginStateChanged {
                plugin_id: "hello".into(),
                old_state: PluginState::Resolved,
                new_state: PluginState::Started,
            }))
            .unwrap();

        let log = component.downcast::<AuditLog>().unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_api_serves_json() {
        let log = std::sync::Arc::new(AuditLog::default());
        log.record(&LifecycleEvent::PluginStopped {
            plugin_id: "hello".into(),
        });
        let api = AuditApi { log };

        let response = api.list(&http::Request::new(Bytes::new())).unwrap();
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body[0]["event"]["type"], "plugin_stopped");
        assert_eq!(body[0]["event"]["plugin_id"], "hello");
    }

    #[test]
    fn test_audited_greeter() {
        assert_eq!(AuditedGreeter.greet("Ada"), "[audited] hello Ada");
    }
}
