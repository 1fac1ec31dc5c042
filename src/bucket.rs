//! Bucket state and the per-bucket worker task.
//!
//! Each bucket owns an unbounded FIFO queue of [`Ticket`]s and exactly one
//! [`BucketQueueTask`] consuming it. The worker serializes requests on the
//! bucket: it waits out local and global quota, performs the request through
//! the executor, feeds the response headers back into the registry and
//! completes the ticket. A retroactive 429 replays the same ticket; a
//! provisional bucket hands its tickets over to the real bucket as soon as
//! the route's hash is learned.

use crate::{
    error::Error,
    request::{Request, Response},
    Limiter,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;

/// One submitted request: its payload, cancellation signal and completion
/// slot.
#[derive(Debug)]
pub(crate) struct Ticket {
    /// Cancellation signal of the request.
    pub cancellation: CancellationToken,
    /// Request to perform.
    pub request: Request,
    /// Completion slot the submitter awaits.
    tx: oneshot::Sender<Result<Response, Error>>,
}

impl Ticket {
    /// Create a new ticket and the receiver for its completion.
    pub fn new(
        request: Request,
        cancellation: CancellationToken,
    ) -> (Self, oneshot::Receiver<Result<Response, Error>>) {
        let (tx, rx) = oneshot::channel();

        (
            Self {
                cancellation,
                request,
                tx,
            },
            rx,
        )
    }

    /// Complete the ticket with a response or an error.
    pub fn complete(self, result: Result<Response, Error>) {
        // the submitter may have stopped waiting
        drop(self.tx.send(result));
    }
}

/// Queue of tickets pending on a bucket.
///
/// The sender half lives here; the sole receiver is owned by the bucket's
/// worker task.
#[derive(Debug)]
pub(crate) struct BucketQueue {
    /// Sending half, taken on shutdown to close the queue.
    tx: Mutex<Option<UnboundedSender<Ticket>>>,
}

impl BucketQueue {
    /// Create a new queue and the worker's receiving half.
    pub fn new() -> (Self, UnboundedReceiver<Ticket>) {
        let (tx, rx) = mpsc::unbounded_channel();

        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Append a ticket, returning it back if the queue has been closed.
    pub fn push(&self, ticket: Ticket) -> Result<(), Ticket> {
        let tx = self.tx.lock().expect("bucket queue poisoned");

        match tx.as_ref() {
            Some(tx) => tx.send(ticket).map_err(|error| error.0),
            None => Err(ticket),
        }
    }

    /// Close the queue; the worker drains what is already queued and stops.
    pub fn close(&self) {
        self.tx.lock().expect("bucket queue poisoned").take();
    }
}

/// Ratelimit state of one bucket and its pending queue.
#[derive(Debug)]
pub(crate) struct Bucket {
    /// Key the bucket is registered under.
    key: Box<str>,
    /// Total number of requests allotted within a reset window.
    limit: AtomicU64,
    /// Whether the bucket was created before its route's hash was known.
    provisional: bool,
    /// Queue of pending tickets.
    queue: BucketQueue,
    /// Remaining number of requests within the current window.
    remaining: AtomicU64,
    /// When the current window ends.
    reset_at: Mutex<Instant>,
}

impl Bucket {
    /// Create a new bucket and the receiver its worker consumes.
    ///
    /// A fresh bucket allows a single request through so the response can
    /// seed the real limits.
    pub fn new(key: Box<str>, provisional: bool) -> (Arc<Self>, UnboundedReceiver<Ticket>) {
        let (queue, rx) = BucketQueue::new();

        (
            Arc::new(Self {
                key,
                limit: AtomicU64::new(1),
                provisional,
                queue,
                remaining: AtomicU64::new(1),
                reset_at: Mutex::new(Instant::now()),
            }),
            rx,
        )
    }

    /// Key the bucket is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the bucket was created under a synthetic hash.
    pub const fn is_provisional(&self) -> bool {
        self.provisional
    }

    /// Total number of requests allotted within a reset window.
    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Remaining number of requests within the current window.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// When the current window ends.
    pub fn reset_at(&self) -> Instant {
        *self.reset_at.lock().expect("bucket reset instant poisoned")
    }

    /// Queue of pending tickets.
    pub const fn queue(&self) -> &BucketQueue {
        &self.queue
    }

    /// Start a fresh window after the previous one passed.
    pub fn refresh(&self) {
        self.remaining.store(self.limit(), Ordering::Relaxed);
    }

    /// Update the bucket from response headers.
    pub fn update(&self, limit: u64, remaining: u64, reset_at: Instant) {
        self.limit.store(limit, Ordering::Relaxed);
        self.remaining.store(remaining, Ordering::Relaxed);
        *self.reset_at.lock().expect("bucket reset instant poisoned") = reset_at;
    }

    /// Exhaust the bucket until the given instant after a 429.
    pub fn set_ratelimited(&self, until: Instant) {
        self.remaining.store(0, Ordering::Relaxed);
        *self.reset_at.lock().expect("bucket reset instant poisoned") = until;
    }
}

/// Sole consumer of a bucket's queue.
pub(crate) struct BucketQueueTask {
    /// Bucket the task is draining.
    bucket: Arc<Bucket>,
    /// Shared ratelimiter state.
    limiter: Arc<Limiter>,
    /// Receiving half of the bucket's queue.
    rx: UnboundedReceiver<Ticket>,
}

impl BucketQueueTask {
    /// Create a new task draining a bucket's queue.
    pub const fn new(
        bucket: Arc<Bucket>,
        limiter: Arc<Limiter>,
        rx: UnboundedReceiver<Ticket>,
    ) -> Self {
        Self {
            bucket,
            limiter,
            rx,
        }
    }

    /// Drain tickets in submission order until the queue is closed.
    pub async fn run(mut self) {
        let span = tracing::debug_span!("background queue task", bucket = %self.bucket.key());

        while let Some(ticket) = self.rx.recv().await {
            // cancelled before dequeue: skipped without consuming quota
            if ticket.cancellation.is_cancelled() {
                continue;
            }

            self.process(ticket, &span).await;
        }

        tracing::debug!(parent: &span, "bucket queue closed, stopping worker");
    }

    /// Drive one ticket to a terminal state: completed, cancelled or handed
    /// to another bucket.
    async fn process(&self, ticket: Ticket, span: &tracing::Span) {
        loop {
            // A provisional bucket collapses into the real one as soon as
            // the hash is known. Re-appending keeps submission order: this
            // worker is the queue's only consumer.
            if self.bucket.is_provisional() {
                if let Some(real) = Limiter::bucket(&self.limiter, ticket.request.route(), false) {
                    if !Arc::ptr_eq(&real, &self.bucket) {
                        tracing::debug!(
                            parent: span,
                            from = %self.bucket.key(),
                            to = %real.key(),
                            "migrating request to discovered bucket",
                        );

                        if let Err(ticket) = real.queue().push(ticket) {
                            ticket.complete(Err(Error::shutdown()));
                        }

                        return;
                    }
                }
            }

            if let Err(error) = self.wait_for_quota(&ticket, span).await {
                return ticket.complete(Err(error));
            }

            let execute = self
                .limiter
                .executor
                .execute(&ticket.request, ticket.cancellation.clone());

            let result = tokio::select! {
                biased;
                () = ticket.cancellation.cancelled() => None,
                result = execute => Some(result),
            };

            let result = match result {
                Some(result) => result,
                None => {
                    tracing::debug!(parent: span, "request cancelled while in flight");

                    return ticket.complete(Err(Error::cancelled()));
                }
            };

            match result {
                Ok(response) => {
                    let retry = Limiter::update_from_response(
                        &self.limiter,
                        ticket.request.route(),
                        &response,
                    );

                    if retry {
                        // retroactive 429; the quota wait above now covers
                        // the backoff recorded on the bucket
                        continue;
                    }

                    return ticket.complete(Ok(response));
                }
                Err(source) => {
                    if ticket.cancellation.is_cancelled() {
                        tracing::debug!(parent: span, "request cancelled during execution");

                        return ticket.complete(Err(Error::cancelled()));
                    }

                    tracing::error!(parent: span, error = %source, "request failed");

                    return ticket.complete(Err(Error::request(source)));
                }
            }
        }
    }

    /// Wait until both the global and the bucket quota admit the ticket.
    ///
    /// Returns an error when the required wait exceeds the effective maximum
    /// delay — evaluated before sleeping, so a refused ticket never reaches
    /// the executor — or when the ticket is cancelled mid-sleep.
    async fn wait_for_quota(&self, ticket: &Ticket, span: &tracing::Span) -> Result<(), Error> {
        loop {
            let now = Instant::now();

            let (delay, global) = match self.limiter.global_reset_at() {
                Some(at) if at > now => (at - now, true),
                _ => {
                    if self.bucket.remaining() > 0 {
                        return Ok(());
                    }

                    let reset_at = self.bucket.reset_at();

                    if reset_at <= now {
                        self.bucket.refresh();

                        return Ok(());
                    }

                    (reset_at - now, false)
                }
            };

            let cap = ticket
                .request
                .options()
                .max_delay()
                .or(self.limiter.max_delay);

            if let Some(cap) = cap {
                if delay > cap {
                    return Err(Error::max_delay_exceeded(delay, global));
                }
            }

            if global {
                tracing::info!(
                    parent: span,
                    milliseconds = %delay.as_millis(),
                    "waiting for global ratelimit to pass",
                );
            } else if ticket.request.route().base().is_create_reaction() {
                tracing::debug!(
                    parent: span,
                    milliseconds = %delay.as_millis(),
                    "waiting for reaction bucket to refresh",
                );
            } else {
                tracing::info!(
                    parent: span,
                    milliseconds = %delay.as_millis(),
                    "waiting for bucket to refresh",
                );
            }

            tokio::select! {
                biased;
                () = ticket.cancellation.cancelled() => return Err(Error::cancelled()),
                () = sleep(delay) => {}
            }
        }
    }
}
