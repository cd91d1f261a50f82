//! Plugin enable/disable status

use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Decides whether a resolved plugin is enabled
///
/// A plugin is disabled if it is listed as disabled, or if an enabled list
/// is configured and does not contain it.
#[derive(Debug, Default)]
pub struct PluginStatusProvider {
    inner: RwLock<StatusLists>,
}

#[derive(Debug, Default)]
struct StatusLists {
    restricted: bool,
    enabled: BTreeSet<String>,
    disabled: BTreeSet<String>,
}

impl PluginStatusProvider {
    /// Create a provider from configured lists
    pub fn new(
        enabled: impl IntoIterator<Item = String>,
        disabled: impl IntoIterator<Item = String>,
    ) -> Self {
        let enabled: BTreeSet<String> = enabled.into_iter().collect();
        Self {
            inner: RwLock::new(StatusLists {
                restricted: !enabled.is_empty(),
                enabled,
                disabled: disabled.into_iter().collect(),
            }),
        }
    }

    /// Whether `plugin_id` is disabled
    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        let lists = self.inner.read();
        if lists.disabled.contains(plugin_id) {
            return true;
        }
        lists.restricted && !lists.enabled.contains(plugin_id)
    }

    /// Enable a plugin
    pub fn enable(&self, plugin_id: &str) {
        let mut lists = self.inner.write();
        lists.disabled.remove(plugin_id);
        if lists.restricted {
            lists.enabled.insert(plugin_id.to_string());
        }
    }

    /// Disable a plugin
    pub fn disable(&self, plugin_id: &str) {
        let mut lists = self.inner.write();
        lists.enabled.remove(plugin_id);
        lists.disabled.insert(plugin_id.to_string());
    }
}
