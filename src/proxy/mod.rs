//! The gateway's backend call abstraction and the circuit breaker middleware.
//!
//! A [`Proxy`] turns a [`Request`] into a [`Response`]; middlewares decorate proxies and
//! keep the same signature, so they compose freely.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use serde_json::{Map, Value};

use super::config::ExtraConfig;

mod middleware;

pub use self::middleware::{backend_factory, BreakerError, FailureStatus, Middleware};

/// A type-erased backend error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A backend call.
pub type Proxy = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response, BoxError>> + Send + Sync>;

/// Builds the backend call of a backend.
pub type BackendFactory = Arc<dyn Fn(&Backend) -> Proxy + Send + Sync>;

/// A request sent to a backend.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    /// The HTTP method.
    pub method: String,
    /// The backend's path, parameters already substituted.
    pub path: String,
    /// Query string parameters.
    pub query: BTreeMap<String, Vec<String>>,
    /// Request headers.
    pub headers: BTreeMap<String, Vec<String>>,
    /// The raw body.
    pub body: Vec<u8>,
}

/// A backend's decoded response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    /// The decoded body.
    pub data: Map<String, Value>,
    /// `false` when parts of the response are missing.
    pub is_complete: bool,
    /// Transport level details.
    pub metadata: Metadata,
}

/// Transport level details of a response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// The HTTP status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: BTreeMap<String, Vec<String>>,
}

/// The part of a backend's configuration read by middlewares.
#[derive(Clone, Debug, Default)]
pub struct Backend {
    /// The backend's path template.
    pub url_pattern: String,
    /// The backend's hosts.
    pub hosts: Vec<String>,
    /// Per-middleware configuration blocks, keyed by namespace.
    pub extra_config: ExtraConfig,
}

/// An error in the way a proxy chain is assembled.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompositionError {
    /// More than one proxy was handed to a middleware which wraps exactly one.
    #[error("too many proxies for this middleware: {0}")]
    TooManyProxies(usize),
    /// No proxy was handed to a middleware which wraps exactly one.
    #[error("no proxy to wrap")]
    NoProxy,
}

/// Wraps an async function into a [`Proxy`].
pub fn proxy_fn<F, Fut>(f: F) -> Proxy
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, BoxError>> + Send + 'static,
{
    Arc::new(move |request| -> BoxFuture<'static, Result<Response, BoxError>> {
        Box::pin(f(request))
    })
}

/// A proxy which answers every request with an empty, complete response.
pub fn noop_proxy() -> Proxy {
    proxy_fn(|_| async {
        Ok(Response {
            is_complete: true,
            ..Response::default()
        })
    })
}
