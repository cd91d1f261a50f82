//! Route table contract for externally routable handlers

use crate::error::Result;
use bytes::Bytes;
use http::Method;
use std::fmt;
use std::sync::Arc;

/// Request handed to a plugin route handler
pub type HandlerRequest = http::Request<Bytes>;

/// Response produced by a plugin route handler
pub type HandlerResponse = http::Response<Bytes>;

/// A bound handler function
pub type HandlerFn = Arc<dyn Fn(&HandlerRequest) -> Result<HandlerResponse> + Send + Sync>;

/// One route exposed by a handler instance
#[derive(Clone)]
pub struct BoundRoute {
    /// HTTP method
    pub method: Method,

    /// Path pattern
    pub path: String,

    /// Handler invoked for matching requests
    pub call: HandlerFn,
}

impl fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// An external handler instance discovered in a plugin, ready to be bound
#[derive(Debug, Clone)]
pub struct ExternalHandler {
    /// Owning plugin id
    pub owner: String,

    /// Component name of the handler instance
    pub component: String,

    /// Routes exposed by the instance
    pub routes: Vec<BoundRoute>,
}

/// A route table entry produced by [`RouteTable::bind`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteBinding {
    /// Owning plugin id
    pub owner: String,

    /// Component name of the handler instance
    pub component: String,

    /// HTTP method
    pub method: Method,

    /// Path pattern
    pub path: String,
}

impl fmt::Display for RouteBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}/{})", self.method, self.path, self.owner, self.component)
    }
}

/// Route table capability consumed from the host
pub trait RouteTable: Send + Sync + fmt::Debug {
    /// Register every route of a handler instance
    fn bind(&self, handler: &ExternalHandler) -> Result<Vec<RouteBinding>>;

    /// Remove one route table entry
    fn unbind(&self, binding: &RouteBinding) -> Result<()>;
}
