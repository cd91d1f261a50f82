//! Core plugin trait and types

use crate::component::{ComponentContainer, Resource};
use crate::error::{PluginError, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Entry point of a plugin
///
/// The runtime builds one instance per start (from the factory named by the
/// descriptor's `plugin_class`), calls [`Plugin::start`] after the plugin's
/// components are registered and [`Plugin::stop`] before they are torn down.
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Start hook
    ///
    /// Called once the plugin's module container is active and every
    /// discovered component has been registered into it.
    fn start(&mut self, ctx: &PluginContext) -> Result<()>;

    /// Stop hook
    ///
    /// Called while the module container is still active. Errors are recorded
    /// by the runtime; teardown continues regardless.
    fn stop(&mut self, ctx: &PluginContext) -> Result<()>;
}

/// Context handed to a plugin's entry point hooks
#[derive(Clone)]
pub struct PluginContext {
    descriptor: Arc<PluginDescriptor>,
    container: Arc<dyn ComponentContainer>,
}

impl PluginContext {
    /// Create a new context
    pub fn new(descriptor: Arc<PluginDescriptor>, container: Arc<dyn ComponentContainer>) -> Self {
        Self {
            descriptor,
            container,
        }
    }

    /// Id of the plugin being started or stopped
    pub fn plugin_id(&self) -> &str {
        &self.descriptor.id
    }

    /// Descriptor of the plugin
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    /// The plugin's module container
    pub fn container(&self) -> &Arc<dyn ComponentContainer> {
        &self.container
    }

    /// Resolve a component by name, falling back to the host root
    pub fn resolve<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.container
            .resolve_component(name)
            .ok_or_else(|| PluginError::component(format!("no component named '{name}'")))?
            .downcast::<T>()
            .ok_or_else(|| PluginError::component(format!("component '{name}' has another type")))
    }

    /// Look up a resource through the plugin's code loader
    pub fn resource(&self, name: &str) -> Option<Resource> {
        self.container.resource(name)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.descriptor.id)
            .finish_non_exhaustive()
    }
}

/// Plugin dependency specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDependency {
    /// Id of the plugin depended on
    pub plugin_id: String,

    /// Version requirement (semver), any version when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_req: Option<String>,

    /// Whether this dependency is optional
    #[serde(default)]
    pub optional: bool,
}

impl PluginDependency {
    /// Create a required dependency
    pub fn required(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version_req: None,
            optional: false,
        }
    }

    /// Create an optional dependency
    pub fn optional(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            version_req: None,
            optional: true,
        }
    }

    /// Set the version requirement
    pub fn with_version(mut self, version_req: impl Into<String>) -> Self {
        self.version_req = Some(version_req.into());
        self
    }

    /// Parse the compact form `id`, `id@req`, `id?` or `id@req?`
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (spec, optional) = match spec.strip_suffix('?') {
            Some(rest) => (rest.trim_end(), true),
            None => (spec, false),
        };

        let (id, version_req) = match spec.split_once('@') {
            Some((id, req)) => (id.trim(), Some(req.trim().to_string())),
            None => (spec, None),
        };

        if id.is_empty() {
            return Err(PluginError::config(format!("empty plugin id in dependency '{spec}'")));
        }
        if let Some(req) = &version_req {
            VersionReq::parse(req).map_err(|e| {
                PluginError::config(format!("invalid version requirement '{req}' for '{id}': {e}"))
            })?;
        }

        Ok(Self {
            plugin_id: id.to_string(),
            version_req,
            optional,
        })
    }

    /// Check if a version satisfies this dependency
    pub fn satisfies(&self, version: &str) -> bool {
        let Some(req) = &self.version_req else {
            return true;
        };
        let Ok(req) = VersionReq::parse(req) else {
            return false;
        };
        let Ok(ver) = Version::parse(version) else {
            return false;
        };
        req.matches(&ver)
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.plugin_id)?;
        if let Some(req) = &self.version_req {
            write!(f, "@{req}")?;
        }
        if self.optional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// Immutable description of a packaged plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin id
    pub id: String,

    /// Plugin version (semver)
    pub version: String,

    /// Human readable description
    #[serde(default)]
    pub description: String,

    /// Plugin provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// License
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Host version requirement (semver)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,

    /// Name of the entry point inside the plugin archive
    pub plugin_class: String,

    /// Declared dependencies, in declaration order
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,

    /// Location of the packaged artifact
    #[serde(default)]
    pub path: PathBuf,
}

impl PluginDescriptor {
    /// Create a descriptor with no dependencies
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        plugin_class: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            description: String::new(),
            provider: None,
            license: None,
            requires: None,
            plugin_class: plugin_class.into(),
            dependencies: Vec::new(),
            path: PathBuf::new(),
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Set the artifact path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the host version requirement
    pub fn with_requires(mut self, requires: impl Into<String>) -> Self {
        self.requires = Some(requires.into());
        self
    }

    /// Required (non-optional) dependencies
    pub fn required_dependencies(&self) -> impl Iterator<Item = &PluginDependency> {
        self.dependencies.iter().filter(|d| !d.optional)
    }
}

/// Plugin state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Descriptor loaded, dependencies not resolved yet
    Created,

    /// Dependencies resolved, ready to start
    Resolved,

    /// Resolved but disabled by the status provider
    Disabled,

    /// Started and running
    Started,

    /// Stopped
    Stopped,

    /// Start failed
    Failed,
}

impl PluginState {
    /// Check if the plugin is started
    pub fn is_started(&self) -> bool {
        matches!(self, PluginState::Started)
    }

    /// Check if the plugin is stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, PluginState::Stopped)
    }

    /// Check if the plugin has failed
    pub fn is_failed(&self) -> bool {
        matches!(self, PluginState::Failed)
    }

    /// Check if the plugin is disabled
    pub fn is_disabled(&self) -> bool {
        matches!(self, PluginState::Disabled)
    }

    /// Check if the plugin has been resolved at some point
    pub fn is_resolved(&self) -> bool {
        !matches!(self, PluginState::Created)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginState::Created => "created",
            PluginState::Resolved => "resolved",
            PluginState::Disabled => "disabled",
            PluginState::Started => "started",
            PluginState::Stopped => "stopped",
            PluginState::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Failure recorded for a plugin that could not be resolved, started or stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartingError {
    /// Plugin id
    pub plugin_id: String,

    /// Short message
    pub message: String,

    /// Full error chain
    pub detail: String,
}

impl StartingError {
    /// Build a starting error from any error, capturing its source chain
    pub fn from_error(plugin_id: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut detail = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            detail.push_str("\ncaused by: ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }

        Self {
            plugin_id: plugin_id.into(),
            message: err.to_string(),
            detail,
        }
    }

    /// Build a starting error from a plain message
    pub fn message(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            plugin_id: plugin_id.into(),
            detail: message.clone(),
            message,
        }
    }
}

impl fmt::Display for StartingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.plugin_id, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_dependency() {
        let dep = PluginDependency::required("auth").with_version("^1.0");
        assert!(!dep.optional);
        assert_eq!(dep.plugin_id, "auth");

        assert!(dep.satisfies("1.0.0"));
        assert!(dep.satisfies("1.4.1"));
        assert!(!dep.satisfies("0.9.0"));
        assert!(!dep.satisfies("2.0.0"));

        assert!(PluginDependency::required("any").satisfies("0.0.1"));
    }

    #[test]
    fn test_parse_dependency() {
        let dep = PluginDependency::parse("core").unwrap();
        assert_eq!(dep, PluginDependency::required("core"));

        let dep = PluginDependency::parse("core@>=1.2").unwrap();
        assert_eq!(dep.version_req.as_deref(), Some(">=1.2"));
        assert!(!dep.optional);

        let dep = PluginDependency::parse("metrics?").unwrap();
        assert!(dep.optional);
        assert_eq!(dep.plugin_id, "metrics");

        let dep = PluginDependency::parse("metrics@^2?").unwrap();
        assert!(dep.optional);
        assert_eq!(dep.to_string(), "metrics@^2?");

        assert!(PluginDependency::parse("@1.0").is_err());
        assert!(PluginDependency::parse("core@not-a-version").is_err());
    }

    #[test]
    fn test_plugin_state() {
        let state = PluginState::Started;
        assert!(state.is_started());
        assert!(!state.is_stopped());
        assert!(!state.is_failed());
        assert_eq!(state.to_string(), "started");

        assert!(!PluginState::Created.is_resolved());
        assert!(PluginState::Disabled.is_resolved());
        assert_eq!(PluginState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_descriptor_required_dependencies() {
        let descriptor = PluginDescriptor::new("b", "1.0.0", "b::Entry")
            .with_dependency(PluginDependency::required("a"))
            .with_dependency(PluginDependency::optional("c"));

        let required: Vec<_> = descriptor
            .required_dependencies()
            .map(|d| d.plugin_id.as_str())
            .collect();
        assert_eq!(required, vec!["a"]);
    }

    #[test]
    fn test_starting_error_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = PluginError::from(io);
        let starting = StartingError::from_error("p", &err);
        assert_eq!(starting.plugin_id, "p");
        assert!(starting.message.contains("disk gone"));
        assert_eq!(starting.to_string(), format!("p: {}", starting.message));
    }
}
