//! # Hello Plugin
//!
//! Sample plugin for the plinth runtime. It defines the [`Greeter`]
//! extension point, ships two implementations of it, and exposes a
//! `GET /hello` route.
//!
//! ## Example
//!
//! ```rust,no_run
//! use plinth_runtime::prelude::*;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<()> {
//! let archives = StaticArchiveLoader::new().with_archive(plinth_hello::PLUGIN_CLASS, plinth_hello::archive);
//! let manager = PluginLifecycleManager::builder()
//!     .archive_loader(Arc::new(archives))
//!     .build()?;
//! manager.load_all()?;
//! manager.start_all();
//!
//! for greeter in manager.lookup::<dyn plinth_hello::Greeter>().iter() {
//!     println!("{}", greeter.greet("world"));
//! }
//! # Ok(())
//! # }
//! ```

use bytes::Bytes;
use http::{Method, Response, StatusCode};
use plinth_api::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point class named by the plugin manifest
pub const PLUGIN_CLASS: &str = "hello::HelloPlugin";

/// Resource holding the salutations used by the greeters
pub const SALUTATIONS_RESOURCE: &str = "hello/salutations.json";

/// Extension point: something that can greet a person
pub trait Greeter: Send + Sync {
    /// Register of the greeting, e.g. `casual`
    fn register(&self) -> &str;

    /// Greet `name`
    fn greet(&self, name: &str) -> String;
}

/// Salutation words, loaded from the plugin's private resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salutations {
    /// Casual salutation
    #[serde(default = "default_casual")]
    pub casual: String,

    /// Formal salutation
    #[serde(default = "default_formal")]
    pub formal: String,
}

fn default_casual() -> String {
    "Hello".to_string()
}

fn default_formal() -> String {
    "Good day".to_string()
}

impl Default for Salutations {
    fn default() -> Self {
        Self {
            casual: default_casual(),
            formal: default_formal(),
        }
    }
}

impl Salutations {
    fn from_context(ctx: &InjectionContext<'_>) -> Result<Self, PluginError> {
        match ctx.resource(SALUTATIONS_RESOURCE) {
            Some(resource) => Ok(serde_json::from_slice(&resource.data)?),
            None => {
                debug!(plugin = %ctx.plugin_id(), "No salutations resource, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Casual greeter
#[derive(Debug)]
pub struct Casual {
    salutations: Arc<Salutations>,
    greeted: AtomicUsize,
}

impl Greeter for Casual {
    fn register(&self) -> &str {
        "casual"
    }

    fn greet(&self, name: &str) -> String {
        self.greeted.fetch_add(1, Ordering::Relaxed);
        format!("{}, {name}!", self.salutations.casual)
    }
}

impl Casual {
    /// Number of greetings produced
    pub fn greeted(&self) -> usize {
        self.greeted.load(Ordering::Relaxed)
    }
}

/// Formal greeter
#[derive(Debug)]
pub struct Formal {
    salutations: Arc<Salutations>,
}

impl Greeter for Formal {
    fn register(&self) -> &str {
        "formal"
    }

    fn greet(&self, name: &str) -> String {
        format!("{}, {name}.", self.salutations.formal)
    }
}

/// HTTP handler serving `GET /hello`
#[derive(Debug)]
pub struct HelloApi {
    greeter: Arc<Casual>,
}

impl HelloApi {
    fn hello(&self, request: &HandlerRequest) -> Result<HandlerResponse, PluginError> {
        let name = request
            .uri()
            .query()
            .and_then(|q| q.split('&').find_map(|pair| pair.strip_prefix("name=")))
            .unwrap_or("world");

        Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(Bytes::from(self.greeter.greet(name)))
            .map_err(PluginError::handler)
    }
}

/// Plugin entry point
#[derive(Debug, Default)]
pub struct HelloPlugin {
    started: bool,
}

impl Plugin for HelloPlugin {
    fn start(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        let casual: Arc<Casual> = ctx.resolve("hello::Casual")?;
        info!(
            plugin = %ctx.plugin_id(),
            salutation = %casual.salutations.casual,
            "Hello plugin started"
        );
        self.started = true;
        Ok(())
    }

    fn stop(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        if let Ok(casual) = ctx.resolve::<Casual>("hello::Casual") {
            info!(plugin = %ctx.plugin_id(), greeted = casual.greeted(), "Hello plugin stopped");
        }
        self.started = false;
        Ok(())
    }
}

/// Package the plugin
///
/// Symbols are listed in dependency order: the greeters resolve the
/// salutations, the API resolves the casual greeter.
pub fn archive() -> PluginArchive {
    PluginArchive::builder()
        .symbol(
            SymbolBuilder::new("hello::Salutations", Salutations::from_context)
                .component()
                .build(),
        )
        .symbol(
            SymbolBuilder::new("hello::Casual", |ctx| {
                Ok(Casual {
                    salutations: ctx.resolve("hello::Salutations")?,
                    greeted: AtomicUsize::new(0),
                })
            })
            .extension(10)
            .implements::<dyn Greeter>(|g| g)
            .build(),
        )
        .symbol(
            SymbolBuilder::new("hello::Formal", |ctx| {
                Ok(Formal {
                    salutations: ctx.resolve("hello::Salutations")?,
                })
            })
            .extension(5)
            .implements::<dyn Greeter>(|g| g)
            .build(),
        )
        .symbol(
            SymbolBuilder::new("hello::HelloApi", |ctx| {
                Ok(HelloApi {
                    greeter: ctx.resolve("hello::Casual")?,
                })
            })
            .handler()
            .route(Method::GET, "/hello", HelloApi::hello)
            .build(),
        )
        .resource(
            SALUTATIONS_RESOURCE,
            r#"{ "casual": "Hello", "formal": "Good day" }"#,
        )
        .entry(PLUGIN_CLASS, || Ok(Box::new(HelloPlugin::default()) as Box<dyn Plugin>))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_api::testing::PluginTestHarness;
    use plinth_api::{ComponentContainer, PluginDescriptor};

    fn harness() -> PluginTestHarness<HelloPlugin> {
        let descriptor = PluginDescriptor::new("hello", "0.1.0", PLUGIN_CLASS);
        let harness = PluginTestHarness::new(descriptor, HelloPlugin::default());
        harness.populate(&archive()).unwrap();
        harness
    }

    #[test]
    fn test_archive_layout() {
        let archive = archive();
        assert!(archive.has_entry(PLUGIN_CLASS));
        assert_eq!(archive.symbol("hello::Casual").unwrap().extension_ordinal(), Some(10));
        assert!(archive.symbol("hello::HelloApi").unwrap().is_handler());
        assert!(archive.resource(SALUTATIONS_RESOURCE).is_some());
    }

    #[test]
    fn test_start_and_stop() {
        let mut harness = harness();
        harness.start().unwrap();
        assert!(harness.plugin().started);
        harness.stop().unwrap();
        assert!(!harness.plugin().started);
    }

    #[test]
    fn test_route_greets_by_query() {
        let harness = harness();
        let api = harness
            .container()
            .resolve_component("hello::HelloApi")
            .and_then(|c| c.downcast::<HelloApi>())
            .unwrap();

        let request = http::Request::builder()
            .uri("/hello?name=Ada")
            .body(Bytes::new())
            .unwrap();
        let response = api.hello(&request).unwrap();
        assert_eq!(response.body(), &Bytes::from("Hello, Ada!"));
    }

    #[test]
    fn test_formal_greeting() {
        let formal = Formal {
            salutations: Arc::new(Salutations::default()),
        };
        assert_eq!(formal.greet("Grace"), "Good day, Grace.");
        assert_eq!(formal.register(), "formal");
    }
}
