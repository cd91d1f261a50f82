//! Test harness for driving a plugin outside the runtime

use super::mocks::MockContainer;
use crate::archive::PluginArchive;
use crate::component::ComponentContainer;
use crate::error::Result;
use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginState};
use crate::symbol::InjectionContext;
use std::sync::Arc;

/// Plugin test harness for testing plugin lifecycle
///
/// Populates a [`MockContainer`] from an archive the way the runtime would
/// (every marked symbol, in declaration order) and drives the entry point.
#[derive(Debug)]
pub struct PluginTestHarness<P: Plugin> {
    plugin: P,
    state: PluginState,
    container: Arc<MockContainer>,
    ctx: PluginContext,
}

impl<P: Plugin> PluginTestHarness<P> {
    /// Create a new test harness with a plugin
    pub fn new(descriptor: PluginDescriptor, plugin: P) -> Self {
        Self::with_container(descriptor, plugin, Arc::new(MockContainer::new()))
    }

    /// Create a harness over an existing container
    pub fn with_container(
        descriptor: PluginDescriptor,
        plugin: P,
        container: Arc<MockContainer>,
    ) -> Self {
        let ctx = PluginContext::new(Arc::new(descriptor), container.clone());
        Self {
            plugin,
            state: PluginState::Resolved,
            container,
            ctx,
        }
    }

    /// Get a reference to the plugin
    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    /// Get the current plugin state
    pub fn state(&self) -> PluginState {
        self.state
    }

    /// The harness container
    pub fn container(&self) -> &Arc<MockContainer> {
        &self.container
    }

    /// Register every marked symbol of `archive` into the container
    pub fn populate(&self, archive: &PluginArchive) -> Result<()> {
        let plugin_id = self.ctx.plugin_id().to_string();
        for symbol in archive.symbols().iter().filter(|s| s.is_marked()) {
            let ctx = InjectionContext::new(&plugin_id, self.container.as_ref());
            let component = symbol.instantiate(&ctx)?;
            self.container.register_component(component)?;
        }
        Ok(())
    }

    /// Start the plugin
    pub fn start(&mut self) -> Result<()> {
        match self.plugin.start(&self.ctx) {
            Ok(()) => {
                self.state = PluginState::Started;
                Ok(())
            }
            Err(e) => {
                self.state = PluginState::Failed;
                Err(e)
            }
        }
    }

    /// Stop the plugin
    pub fn stop(&mut self) -> Result<()> {
        let result = self.plugin.stop(&self.ctx);
        self.state = PluginState::Stopped;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolBuilder;
    use crate::testing::MockPlugin;

    #[test]
    fn test_harness_lifecycle() {
        let descriptor = PluginDescriptor::new("mock", "1.0.0", "mock::Plugin");
        let mut harness = PluginTestHarness::new(descriptor, MockPlugin::new());
        assert_eq!(harness.state(), PluginState::Resolved);

        harness.start().unwrap();
        assert_eq!(harness.state(), PluginState::Started);
        assert_eq!(harness.plugin().start_calls(), 1);

        harness.stop().unwrap();
        assert_eq!(harness.state(), PluginState::Stopped);
    }

    #[test]
    fn test_harness_start_failure() {
        let descriptor = PluginDescriptor::new("mock", "1.0.0", "mock::Plugin");
        let mut harness =
            PluginTestHarness::new(descriptor, MockPlugin::new().failing_start("broken"));
        assert!(harness.start().is_err());
        assert_eq!(harness.state(), PluginState::Failed);
    }

    #[test]
    fn test_harness_populate() {
        let archive = PluginArchive::builder()
            .symbol(SymbolBuilder::new("mock::Config", |_| Ok(String::from("cfg"))).component().build())
            .symbol(
                SymbolBuilder::new("mock::Service", |ctx| {
                    let config = ctx.resolve::<String>("mock::Config")?;
                    Ok(format!("service({config})"))
                })
                .component()
                .build(),
            )
            .symbol(SymbolBuilder::new("mock::Unmarked", |_| Ok(0u8)).build())
            .build();

        let descriptor = PluginDescriptor::new("mock", "1.0.0", "mock::Plugin");
        let harness = PluginTestHarness::new(descriptor, MockPlugin::new());
        harness.populate(&archive).unwrap();

        assert_eq!(
            harness.container().component_names(),
            vec!["mock::Config", "mock::Service"]
        );
    }
}
