mod common;

use common::MockExecutor;
use concord_http_ratelimiting::{ErrorType, Method, RateLimiter, Request, Route};
use http::StatusCode;
use tokio::{
    task,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

fn route() -> Route {
    Route::new(Method::Get, "/channels/{channel}/messages").channel(42)
}

fn request() -> Request {
    Request::new(route(), "/channels/42/messages")
}

#[tokio::test(start_paused = true)]
async fn replay_after_bucket_429() {
    let executor = MockExecutor::new();
    executor.queue(common::too_many_requests("abc", "0.5", "user"));
    executor.queue(common::ok_with("abc", 5, 4, "1.0"));
    let limiter = RateLimiter::new(executor.clone());
    let now = Instant::now();

    let response = limiter.execute(request()).await.unwrap();

    // one submission, two dispatches, spaced by the retry-after
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!(2, executor.call_count());
    assert!(now.elapsed() >= Duration::from_millis(500));

    let times = executor.call_times();
    assert!(times[1] - times[0] >= Duration::from_millis(500));
    assert!(!limiter.globally_locked());
}

#[tokio::test(start_paused = true)]
async fn window_limit() {
    let executor = MockExecutor::new();
    executor.queue(common::ok_with("abc", 2, 0, "1.0"));
    let limiter = RateLimiter::new(executor.clone());

    limiter.execute(request()).await.unwrap();
    assert!(limiter.is_limited(&route()));

    let now = Instant::now();
    limiter.execute(request()).await.unwrap();

    assert!(now.elapsed() >= Duration::from_secs(1));
    assert_eq!(2, executor.call_count());
}

#[tokio::test(start_paused = true)]
async fn max_delay_exceeded() {
    let executor = MockExecutor::new();
    executor.queue(common::ok_with("abc", 1, 0, "5.0"));
    let limiter = RateLimiter::builder(executor.clone())
        .max_delay(Duration::from_secs(1))
        .build();

    limiter.execute(request()).await.unwrap();

    let error = limiter.execute(request()).await.unwrap_err();
    assert!(matches!(
        error.kind(),
        ErrorType::MaxDelayExceeded {
            delay,
            global: false,
        } if *delay == Duration::from_secs(5),
    ));
    // the refused request never reached the executor
    assert_eq!(1, executor.call_count());
}

#[tokio::test(start_paused = true)]
async fn per_request_cap_admits_longer_wait() {
    let executor = MockExecutor::new();
    executor.queue(common::ok_with("abc", 1, 0, "2.0"));
    let limiter = RateLimiter::builder(executor.clone())
        .max_delay(Duration::from_secs(1))
        .build();

    limiter.execute(request()).await.unwrap();

    let now = Instant::now();
    let relaxed = Request::builder(route(), "/channels/42/messages")
        .max_delay(Duration::from_secs(3))
        .build();

    limiter.execute(relaxed).await.unwrap();

    assert!(now.elapsed() >= Duration::from_secs(2));
    assert_eq!(2, executor.call_count());
}

#[tokio::test(start_paused = true)]
async fn per_request_cap_refuses() {
    let executor = MockExecutor::new();
    executor.queue(common::ok_with("abc", 1, 0, "5.0"));
    let limiter = RateLimiter::new(executor.clone());

    limiter.execute(request()).await.unwrap();

    let capped = Request::builder(route(), "/channels/42/messages")
        .max_delay(Duration::from_secs(1))
        .build();

    let error = limiter.execute(capped).await.unwrap_err();
    assert!(matches!(
        error.kind(),
        ErrorType::MaxDelayExceeded { global: false, .. },
    ));
    assert_eq!(1, executor.call_count());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_wait() {
    let executor = MockExecutor::new();
    executor.queue(common::ok_with("abc", 1, 0, "10.0"));
    let limiter = RateLimiter::new(executor.clone());

    limiter.execute(request()).await.unwrap();

    let token = CancellationToken::new();
    let pending = tokio::spawn({
        let limiter = limiter.clone();
        let token = token.clone();
        async move { limiter.execute_with_cancellation(request(), token).await }
    });

    time::sleep(Duration::from_millis(50)).await;

    let now = Instant::now();
    token.cancel();

    let result = pending.await.unwrap();
    assert!(matches!(result.unwrap_err().kind(), ErrorType::Cancelled));

    // completed promptly rather than at the 10s reset
    assert!(now.elapsed() < Duration::from_secs(1));
    assert_eq!(1, executor.call_count());

    // cancellation withdraws no quota
    let bucket = limiter.bucket(&route()).unwrap();
    assert_eq!(0, bucket.remaining);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_dequeue() {
    let executor = MockExecutor::new();
    let limiter = RateLimiter::new(executor.clone());

    let token = CancellationToken::new();
    token.cancel();

    let error = limiter
        .execute_with_cancellation(request(), token)
        .await
        .unwrap_err();
    assert!(matches!(error.kind(), ErrorType::Cancelled));

    for _ in 0..10 {
        task::yield_now().await;
    }

    assert_eq!(0, executor.call_count());
}
