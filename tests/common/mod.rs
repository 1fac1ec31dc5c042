#![allow(dead_code)]

use concord_http_ratelimiting::{ExecuteFuture, Executor, GenericError, Request, Response};
use http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Executor that replays scripted responses and records its invocations.
///
/// Clones share their state, so a clone handed to the ratelimiter can be
/// inspected through the original. Without a scripted response a call
/// produces a plain 200 with no ratelimit headers.
#[derive(Clone, Debug, Default)]
pub struct MockExecutor {
    state: Arc<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    active: AtomicU64,
    calls: Mutex<Vec<(String, Instant)>>,
    max_active: AtomicU64,
    responses: Mutex<VecDeque<Result<Response, GenericError>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, response: Response) {
        self.state
            .responses
            .lock()
            .unwrap()
            .push_back(Ok(response));
    }

    pub fn queue_error(&self, error: GenericError) {
        self.state
            .responses
            .lock()
            .unwrap()
            .push_back(Err(error));
    }

    /// Paths of the performed requests, in dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Dispatch instants of the performed requests.
    pub fn call_times(&self) -> Vec<Instant> {
        self.state
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.state.calls.lock().unwrap().len()
    }

    /// Highest number of requests that were ever in flight at once.
    pub fn max_active(&self) -> u64 {
        self.state.max_active.load(Ordering::SeqCst)
    }
}

impl Executor for MockExecutor {
    fn execute(&self, request: &Request, _cancellation: CancellationToken) -> ExecuteFuture {
        let path = request.path().to_owned();
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            state.calls.lock().unwrap().push((path, Instant::now()));

            let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
            state.max_active.fetch_max(active, Ordering::SeqCst);

            // give concurrent dispatches a chance to overlap
            tokio::task::yield_now().await;

            state.active.fetch_sub(1, Ordering::SeqCst);

            match state.responses.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(ok()),
            }
        })
    }
}

/// Build a header map from name-value pairs.
pub fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, value) in pairs {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }

    map
}

/// A 200 response without ratelimit headers.
pub fn ok() -> Response {
    Response::new(StatusCode::OK, HeaderMap::new(), Vec::new())
}

/// A 200 response carrying bucket quota headers.
pub fn ok_with(bucket: &str, limit: u64, remaining: u64, reset_after: &str) -> Response {
    Response::new(
        StatusCode::OK,
        headers(&[
            ("x-ratelimit-bucket", bucket),
            ("x-ratelimit-limit", &limit.to_string()),
            ("x-ratelimit-remaining", &remaining.to_string()),
            ("x-ratelimit-reset-after", reset_after),
            ("via", "1.1 proxy"),
        ]),
        Vec::new(),
    )
}

/// A bucket-scoped 429 response.
pub fn too_many_requests(bucket: &str, retry_after: &str, scope: &str) -> Response {
    Response::new(
        StatusCode::TOO_MANY_REQUESTS,
        headers(&[
            ("x-ratelimit-bucket", bucket),
            ("x-ratelimit-scope", scope),
            ("retry-after", retry_after),
            ("via", "1.1 proxy"),
        ]),
        Vec::new(),
    )
}

/// A global 429 response.
pub fn globally_limited(retry_after: &str) -> Response {
    Response::new(
        StatusCode::TOO_MANY_REQUESTS,
        headers(&[
            ("x-ratelimit-global", "true"),
            ("x-ratelimit-scope", "global"),
            ("retry-after", retry_after),
            ("via", "1.1 proxy"),
        ]),
        Vec::new(),
    )
}

/// A 429 response that did not pass through the API's proxy.
pub fn edge_limited(retry_after: &str) -> Response {
    Response::new(
        StatusCode::TOO_MANY_REQUESTS,
        headers(&[("retry-after", retry_after)]),
        Vec::new(),
    )
}
