//! Plugin error types

use std::fmt;

/// Plugin error type
///
/// Raised by plugin code (entry hooks, component factories, route handlers,
/// event listeners) and by the host collaborators the runtime calls into.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Component could not be built, registered or resolved
    #[error("Component error: {0}")]
    ComponentError(String),

    /// Dependency missing
    #[error("Dependency missing: {0}")]
    DependencyMissing(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Route handler failed or a route could not be bound
    #[error("Handler error: {0}")]
    HandlerError(String),

    /// Event listener failed
    #[error("Listener error: {0}")]
    ListenerError(String),

    /// Plugin code panicked
    #[error("Plugin panicked: {0}")]
    Panicked(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    /// Create a new runtime error
    pub fn runtime(msg: impl fmt::Display) -> Self {
        Self::RuntimeError(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config(msg: impl fmt::Display) -> Self {
        Self::ConfigError(msg.to_string())
    }

    /// Create a new component error
    pub fn component(msg: impl fmt::Display) -> Self {
        Self::ComponentError(msg.to_string())
    }

    /// Create a new dependency missing error
    pub fn dependency(name: impl fmt::Display) -> Self {
        Self::DependencyMissing(name.to_string())
    }

    /// Create a new invalid state error
    pub fn invalid_state(msg: impl fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }

    /// Create a new handler error
    pub fn handler(msg: impl fmt::Display) -> Self {
        Self::HandlerError(msg.to_string())
    }

    /// Create a new listener error
    pub fn listener(msg: impl fmt::Display) -> Self {
        Self::ListenerError(msg.to_string())
    }

    /// Convert a caught panic payload into an error
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(msg)
    }
}

/// Run plugin code, converting a panic into [`PluginError::Panicked`]
///
/// Plugin faults must stay inside the plugin boundary; the host never unwinds
/// through code it did not write.
pub fn guard<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PluginError::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PluginError::runtime("test");
        assert!(matches!(err, PluginError::RuntimeError(_)));

        let err = PluginError::config("test");
        assert!(matches!(err, PluginError::ConfigError(_)));

        let err = PluginError::component("test");
        assert!(matches!(err, PluginError::ComponentError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = PluginError::HandlerError("no route".to_string());
        assert_eq!(err.to_string(), "Handler error: no route");
    }

    #[test]
    fn test_guard_catches_panic() {
        let result: Result<()> = guard(|| panic!("boom"));
        match result {
            Err(PluginError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }

        let formatted: Result<()> = guard(|| panic!("code {}", 7));
        assert!(matches!(formatted, Err(PluginError::Panicked(ref m)) if m == "code 7"));
    }

    #[test]
    fn test_guard_passes_through() {
        assert_eq!(guard(|| Ok(5)).unwrap(), 5);
        assert!(guard::<()>(|| Err(PluginError::runtime("x"))).is_err());
    }
}
