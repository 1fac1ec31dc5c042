#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    clippy::pedantic,
    clippy::missing_docs_in_private_items,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused
)]
#![doc = include_str!("../README.md")]
#![allow(
    clippy::module_name_repetitions,
    clippy::semicolon_if_nothing_returned,
    clippy::unnecessary_wraps
)]

pub mod error;
pub mod headers;
pub mod request;
pub mod routing;

mod bucket;

pub use self::{
    error::{Error, ErrorType},
    headers::RatelimitHeaders,
    request::{ExecuteFuture, Executor, Request, RequestBuilder, RequestOptions, Response},
    routing::{Method, Path, Route},
};

use self::{
    bucket::{Bucket, BucketQueueTask, Ticket},
    headers::RatelimitScope,
};
use http::StatusCode;
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A generic error type returned by executors.
pub type GenericError = Box<dyn std::error::Error + Send + Sync>;

/// Retry-after duration up to which a route's first 429 is logged at info
/// rather than warn.
const SHORT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Snapshot of a bucket's ratelimit state.
#[derive(Clone, Copy, Debug)]
pub struct BucketInfo {
    /// Total number of requests allotted within a reset window.
    pub limit: u64,
    /// Remaining number of requests within the current window.
    pub remaining: u64,
    /// When the current window ends.
    pub reset_at: Instant,
}

/// State guarded by the registry mutex.
///
/// The mutex is held only for O(1) map operations and never across an await.
#[derive(Debug, Default)]
struct RegistryState {
    /// Buckets by key.
    buckets: HashMap<Box<str>, Arc<Bucket>>,
    /// When the global lockout ends, if one is in place.
    global_reset_at: Option<Instant>,
    /// Learned bucket hashes by base route.
    hashes: HashMap<Path, Box<str>>,
    /// Base routes that have hit a 429, for log severity selection.
    hit_routes: HashSet<Path>,
}

/// Shared ratelimiter state: the registry, the configuration and the
/// executor.
#[derive(Debug)]
pub(crate) struct Limiter {
    /// Whether the ratelimiter has shut down.
    closed: AtomicBool,
    /// Executor performing the requests.
    pub(crate) executor: Box<dyn Executor>,
    /// Cap on how long a request may wait for quota, unless overridden per
    /// request. `None` waits indefinitely.
    pub(crate) max_delay: Option<Duration>,
    /// Registry of buckets, hashes and the global lockout.
    state: Mutex<RegistryState>,
}

impl Limiter {
    /// Lock the registry.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("ratelimiter registry poisoned")
    }

    /// When the global lockout ends, if one is in place.
    pub(crate) fn global_reset_at(&self) -> Option<Instant> {
        self.lock().global_reset_at
    }

    /// Resolve the bucket for a formatted route, optionally creating it.
    ///
    /// Returns `None` only if `create` is `false` and no bucket exists.
    pub(crate) fn bucket(this: &Arc<Self>, route: &Route, create: bool) -> Option<Arc<Bucket>> {
        let mut state = this.lock();

        Self::bucket_locked(this, &mut state, route, create)
    }

    /// Resolve or create a bucket with the registry already locked.
    ///
    /// Creating a bucket spawns its worker task. A bucket created after
    /// shutdown has its queue closed immediately, so submissions to it are
    /// refused.
    fn bucket_locked(
        this: &Arc<Self>,
        state: &mut RegistryState,
        route: &Route,
        create: bool,
    ) -> Option<Arc<Bucket>> {
        let (key, provisional) = match state.hashes.get(route.base()) {
            Some(hash) => (route.bucket_key(Some(hash)), false),
            None => (route.bucket_key(None), true),
        };

        match state.buckets.entry(key.into_boxed_str()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                if !create {
                    return None;
                }

                tracing::debug!(key = %entry.key(), provisional, "creating new bucket");

                let (bucket, rx) = Bucket::new(entry.key().clone(), provisional);
                entry.insert(Arc::clone(&bucket));

                tokio::spawn(
                    BucketQueueTask::new(Arc::clone(&bucket), Arc::clone(this), rx).run(),
                );

                if this.closed.load(Ordering::Acquire) {
                    bucket.queue().close();
                }

                Some(bucket)
            }
        }
    }

    /// Interpret a response on behalf of a formatted route.
    ///
    /// Records a newly revealed bucket hash, applies quota headers and
    /// lockouts, and returns `true` iff the response was a retryable 429,
    /// signalling the worker to replay the request once the recorded
    /// lockout passes.
    pub(crate) fn update_from_response(
        this: &Arc<Self>,
        route: &Route,
        response: &Response,
    ) -> bool {
        let pairs = response
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes()));

        let headers = match RatelimitHeaders::from_pairs(pairs) {
            Ok(headers) => headers,
            Err(source) => {
                tracing::error!(
                    error = %source,
                    path = %route,
                    "failed to parse ratelimit headers",
                );

                return false;
            }
        };

        let now = Instant::now();
        let mut state = this.lock();

        // The first hash observed for a base route wins for the life of the
        // ratelimiter.
        if let Some(hash) = headers.bucket() {
            match state.hashes.entry(route.base().clone()) {
                Entry::Occupied(entry) => {
                    if entry.get().as_ref() != hash {
                        tracing::debug!(
                            known = %entry.get(),
                            observed = %hash,
                            path = %route.base(),
                            "conflicting bucket hash observed, keeping the known hash",
                        );
                    }
                }
                Entry::Vacant(entry) => {
                    tracing::debug!(hash = %hash, path = %route.base(), "discovered bucket hash");

                    entry.insert(hash.into());
                }
            }
        }

        match headers {
            RatelimitHeaders::Ratelimited(info)
                if response.status() == StatusCode::TOO_MANY_REQUESTS =>
            {
                if info.global() || !info.proxied() {
                    // No bucket backoff is recorded: the replay's wait is
                    // covered by every worker's pre-execute global check.
                    state.global_reset_at = Some(now + info.retry_after());

                    tracing::warn!(
                        global_header = info.global(),
                        path = %route,
                        seconds = info.retry_after().as_secs_f64(),
                        "globally ratelimited",
                    );

                    true
                } else {
                    let first = state.hit_routes.insert(route.base().clone());

                    if let Some(bucket) = Self::bucket_locked(this, &mut state, route, true) {
                        bucket.set_ratelimited(now + info.retry_after());
                    }

                    let expected = (first && info.retry_after() <= SHORT_RETRY_AFTER)
                        || info.scope() == Some(RatelimitScope::Shared);

                    if expected {
                        tracing::info!(
                            path = %route,
                            scope = ?info.scope(),
                            seconds = info.retry_after().as_secs_f64(),
                            "bucket ratelimit hit",
                        );
                    } else {
                        tracing::warn!(
                            path = %route,
                            scope = ?info.scope(),
                            seconds = info.retry_after().as_secs_f64(),
                            "bucket ratelimit hit",
                        );
                    }

                    true
                }
            }
            RatelimitHeaders::Present(info) => {
                if let Some(bucket) = Self::bucket_locked(this, &mut state, route, true) {
                    bucket.update(info.limit(), info.remaining(), now + info.reset_after());

                    tracing::trace!(
                        key = %bucket.key(),
                        limit = info.limit(),
                        remaining = info.remaining(),
                        "updated bucket",
                    );
                }

                false
            }
            _ => false,
        }
    }
}

/// Ratelimiter for the REST API.
///
/// Every outbound request is submitted through [`execute`] and queued on the
/// bucket of its route. One worker task per bucket dispatches the queue in
/// submission order, waiting out bucket and global quotas, and transparently
/// replays requests the API retroactively rejected with a 429.
///
/// Bucket identities are discovered lazily: until a route's hash is revealed
/// by a response header, its requests queue on a provisional bucket that is
/// merged into the real one upon discovery.
///
/// The ratelimiter is cheap to clone and all clones share their state.
///
/// [`execute`]: Self::execute
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Shared state of all clones of the ratelimiter.
    limiter: Arc<Limiter>,
}

impl RateLimiter {
    /// Create a new ratelimiter with default configuration.
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self::builder(executor).build()
    }

    /// Create a builder for a ratelimiter.
    pub fn builder(executor: impl Executor + 'static) -> RateLimiterBuilder {
        RateLimiterBuilder {
            executor: Box::new(executor),
            max_delay: None,
        }
    }

    /// Execute a request under the ratelimiter's scheduling.
    ///
    /// Resolves when the executor produced a response, which may be after
    /// waiting out bucket or global ratelimits and replaying a retroactive
    /// 429.
    ///
    /// # Errors
    ///
    /// Returns an error of type [`ErrorType::MaxDelayExceeded`] when the
    /// required wait exceeds the effective maximum delay, of type
    /// [`ErrorType::RequestError`] when the executor fails, and of type
    /// [`ErrorType::Shutdown`] when the ratelimiter has shut down.
    pub async fn execute(&self, request: Request) -> Result<Response, Error> {
        self.execute_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Execute a request that can be cancelled.
    ///
    /// Cancelling the token aborts any quota wait and any in-flight call to
    /// the executor; the request then fails with an error of type
    /// [`ErrorType::Cancelled`]. Deadlines are implemented by cancelling the
    /// token when the deadline passes.
    ///
    /// # Errors
    ///
    /// As [`execute`], plus an error of type [`ErrorType::Cancelled`] when
    /// the token fires before a response was produced.
    ///
    /// [`execute`]: Self::execute
    pub async fn execute_with_cancellation(
        &self,
        request: Request,
        cancellation: CancellationToken,
    ) -> Result<Response, Error> {
        if self.limiter.closed.load(Ordering::Acquire) {
            return Err(Error::shutdown());
        }

        let bucket = Limiter::bucket(&self.limiter, request.route(), true)
            .ok_or_else(|| Error::shutdown())?;

        let (ticket, rx) = Ticket::new(request, cancellation.clone());

        if bucket.queue().push(ticket).is_err() {
            return Err(Error::shutdown());
        }

        tokio::select! {
            biased;
            result = rx => result.unwrap_or_else(|_| Err(Error::cancelled())),
            () = cancellation.cancelled() => Err(Error::cancelled()),
        }
    }

    /// Whether a global lockout is currently in place.
    #[must_use]
    pub fn globally_locked(&self) -> bool {
        self.limiter
            .global_reset_at()
            .map_or(false, |at| at > Instant::now())
    }

    /// Whether the bucket of a route exists and is out of quota.
    ///
    /// Read-only probe; never creates a bucket.
    #[must_use]
    pub fn is_limited(&self, route: &Route) -> bool {
        self.probe(route)
            .map_or(false, |bucket| bucket.remaining() == 0)
    }

    /// Retrieve a snapshot of the bucket of a route, if one exists.
    ///
    /// Read-only probe; never creates a bucket.
    #[must_use]
    pub fn bucket(&self, route: &Route) -> Option<BucketInfo> {
        self.probe(route).map(|bucket| BucketInfo {
            limit: bucket.limit(),
            remaining: bucket.remaining(),
            reset_at: bucket.reset_at(),
        })
    }

    /// Shut the ratelimiter down.
    ///
    /// New submissions are refused with an error of type
    /// [`ErrorType::Shutdown`]. Workers drain the requests already queued —
    /// each completes or is cancelled — and then stop.
    pub fn shutdown(&self) {
        self.limiter.closed.store(true, Ordering::Release);

        let state = self.limiter.lock();

        for bucket in state.buckets.values() {
            bucket.queue().close();
        }
    }

    /// Look up the bucket of a route without creating one.
    fn probe(&self, route: &Route) -> Option<Arc<Bucket>> {
        let state = self.limiter.lock();
        let key = route.bucket_key(state.hashes.get(route.base()).map(|hash| &**hash));

        state.buckets.get(key.as_str()).map(Arc::clone)
    }
}

/// Builder for a [`RateLimiter`].
#[derive(Debug)]
#[must_use = "ratelimiter builders have no effect if unused"]
pub struct RateLimiterBuilder {
    /// Executor performing the requests.
    executor: Box<dyn Executor>,
    /// Cap on how long a request may wait for quota.
    max_delay: Option<Duration>,
}

impl RateLimiterBuilder {
    /// Cap how long a request may wait for quota before being refused with
    /// an error of type [`ErrorType::MaxDelayExceeded`].
    ///
    /// Without a cap, requests wait indefinitely. A per-request cap set via
    /// [`RequestBuilder::max_delay`] supersedes this value.
    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);

        self
    }

    /// Consume the builder, returning the built ratelimiter.
    pub fn build(self) -> RateLimiter {
        RateLimiter {
            limiter: Arc::new(Limiter {
                closed: AtomicBool::new(false),
                executor: self.executor,
                max_delay: self.max_delay,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BucketInfo, RateLimiter, RateLimiterBuilder};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(BucketInfo: Clone, Copy, Debug, Send, Sync);
    assert_impl_all!(RateLimiter: Clone, Debug, Send, Sync);
    assert_impl_all!(RateLimiterBuilder: Debug, Send, Sync);
}
