//! Plugin runtime error types

use plinth_api::PluginError;
use std::fmt;

/// Plugin runtime error type
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Error raised by plugin code or a host collaborator
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Plugin, container or extension not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Plugin already exists
    #[error("Plugin already exists: {0}")]
    AlreadyExists(String),

    /// Dependency missing
    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    /// Dependency cycle detected
    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// A plugin failed to start
    #[error("Plugin '{plugin_id}' failed to start: {message}")]
    PluginStart {
        /// Plugin id
        plugin_id: String,
        /// Failure message
        message: String,
    },

    /// A plugin failed to stop cleanly
    #[error("Plugin '{plugin_id}' failed to stop: {message}")]
    PluginStop {
        /// Plugin id
        plugin_id: String,
        /// Failure message
        message: String,
    },

    /// Teardown step failed (logged, never propagated out of lifecycle calls)
    #[error("Teardown of '{plugin_id}' failed: {message}")]
    Teardown {
        /// Plugin id
        plugin_id: String,
        /// Failure message
        message: String,
    },

    /// Manifest could not be read or is invalid
    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest {
        /// Manifest path
        path: String,
        /// Failure message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// File watching error
    #[error("Watch error: {0}")]
    Watch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Create a new not found error
    pub fn not_found(name: impl fmt::Display) -> Self {
        Self::NotFound(name.to_string())
    }

    /// Create a new already exists error
    pub fn already_exists(name: impl fmt::Display) -> Self {
        Self::AlreadyExists(name.to_string())
    }

    /// Create a new dependency missing error
    pub fn dependency_missing(name: impl fmt::Display) -> Self {
        Self::DependencyMissing(name.to_string())
    }

    /// Create a new dependency cycle error from the cycle path
    pub fn dependency_cycle(path: &[String]) -> Self {
        Self::DependencyCycle(path.join(" -> "))
    }

    /// Create a new start error
    pub fn start(plugin_id: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::PluginStart {
            plugin_id: plugin_id.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a new stop error
    pub fn stop(plugin_id: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::PluginStop {
            plugin_id: plugin_id.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a new teardown error
    pub fn teardown(plugin_id: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Teardown {
            plugin_id: plugin_id.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a new invalid manifest error
    pub fn invalid_manifest(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::InvalidManifest {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a new config error
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a new watch error
    pub fn watch(msg: impl fmt::Display) -> Self {
        Self::Watch(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = RuntimeError::not_found("test");
        assert!(matches!(err, RuntimeError::NotFound(_)));

        let err = RuntimeError::already_exists("test");
        assert!(matches!(err, RuntimeError::AlreadyExists(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RuntimeError::NotFound("auth".to_string());
        assert_eq!(err.to_string(), "Not found: auth");

        let cycle = RuntimeError::dependency_cycle(&["a".into(), "b".into(), "a".into()]);
        assert_eq!(cycle.to_string(), "Dependency cycle detected: a -> b -> a");

        let start = RuntimeError::start("p", "boom");
        assert_eq!(start.to_string(), "Plugin 'p' failed to start: boom");
    }
}
