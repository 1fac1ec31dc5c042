//! Requests submitted to the ratelimiter and the executor that performs them.
//!
//! The ratelimiter does not speak HTTP itself. Callers hand it a [`Request`]
//! and it schedules the request onto the right bucket; when the bucket's
//! quota allows, the configured [`Executor`] — typically a thin wrapper over
//! an HTTP client — performs the request and hands back a [`Response`] for
//! header interpretation.

use crate::{routing::Route, GenericError};
use http::{HeaderMap, StatusCode};
use std::{fmt::Debug, future::Future, pin::Pin, time::Duration};
use tokio_util::sync::CancellationToken;

/// Future returned by [`Executor::execute`].
pub type ExecuteFuture = Pin<Box<dyn Future<Output = Result<Response, GenericError>> + Send>>;

/// Performs HTTP requests on behalf of the ratelimiter.
///
/// Implementations must abort the request promptly when the provided
/// cancellation token fires. The ratelimiter additionally guards the call
/// with the same token, so a non-cooperative implementation delays
/// cancellation observation but can not suppress it.
pub trait Executor: Debug + Send + Sync {
    /// Perform a request, returning its response or a transport error.
    fn execute(&self, request: &Request, cancellation: CancellationToken) -> ExecuteFuture;
}

/// Per-request options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Cap on how long this request may wait for quota, superseding the
    /// ratelimiter's own cap.
    max_delay: Option<Duration>,
}

impl RequestOptions {
    /// Cap on how long this request may wait for quota, if any.
    #[must_use]
    pub const fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }
}

/// A request to be performed under the ratelimiter's scheduling.
#[derive(Clone, Debug)]
pub struct Request {
    /// Body of the request, if any.
    pub(crate) body: Option<Vec<u8>>,
    /// Per-request options.
    pub(crate) options: RequestOptions,
    /// Concrete request path, with all parameters bound.
    pub(crate) path: String,
    /// Formatted route the request is bucketed on.
    pub(crate) route: Route,
}

impl Request {
    /// Create a new request with no body and default options.
    pub fn new(route: Route, path: impl Into<String>) -> Self {
        Self {
            body: None,
            options: RequestOptions::default(),
            path: path.into(),
            route,
        }
    }

    /// Create a builder for a request.
    pub fn builder(route: Route, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder(Self::new(route, path))
    }

    /// Body of the request, if any.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Per-request options.
    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Concrete request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Formatted route the request is bucketed on.
    pub const fn route(&self) -> &Route {
        &self.route
    }
}

/// Builder for a [`Request`].
#[derive(Debug)]
#[must_use = "request builders have no effect if unused"]
pub struct RequestBuilder(Request);

impl RequestBuilder {
    /// Set the body of the request.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.0.body = Some(body);

        self
    }

    /// Cap how long this request may wait for quota.
    ///
    /// Supersedes the ratelimiter's configured maximum delay for this
    /// request only.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.0.options.max_delay = Some(max_delay);

        self
    }

    /// Consume the builder, returning the built request.
    #[allow(clippy::missing_const_for_fn)]
    pub fn build(self) -> Request {
        self.0
    }
}

/// Response produced by an [`Executor`].
///
/// Only the status code and the headers are interpreted by the ratelimiter;
/// the body passes through to the caller untouched.
#[derive(Debug)]
pub struct Response {
    /// Body of the response.
    body: Vec<u8>,
    /// Headers of the response.
    headers: HeaderMap,
    /// Status code of the response.
    status: StatusCode,
}

impl Response {
    /// Create a new response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            body,
            headers,
            status,
        }
    }

    /// Body of the response.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Headers of the response.
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Status code of the response.
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Consume the response, returning its body.
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}
