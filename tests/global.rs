mod common;

use common::MockExecutor;
use concord_http_ratelimiting::{Method, RateLimiter, Request, Route};
use tokio::{
    task,
    time::{self, Duration, Instant},
};

fn user_request() -> Request {
    Request::new(Route::new(Method::Get, "/users/@me"), "/users/@me")
}

fn gateway_request() -> Request {
    Request::new(Route::new(Method::Get, "/gateway/bot"), "/gateway/bot")
}

#[tokio::test(start_paused = true)]
async fn global_lockout() {
    let executor = MockExecutor::new();
    executor.queue(common::globally_limited("2.0"));
    let limiter = RateLimiter::new(executor.clone());
    let now = Instant::now();

    let first = tokio::spawn({
        let limiter = limiter.clone();
        async move { limiter.execute(user_request()).await }
    });

    for _ in 0..10 {
        task::yield_now().await;
    }

    // the 429 has been interpreted but no time has passed
    assert_eq!(1, executor.call_count());
    assert!(limiter.globally_locked());

    let second = tokio::spawn({
        let limiter = limiter.clone();
        async move { limiter.execute(gateway_request()).await }
    });

    // neither request fails; the rejected one is replayed
    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(3, executor.call_count());

    for at in &executor.call_times()[1..] {
        assert!(*at >= now + Duration::from_secs(2));
    }
}

#[tokio::test(start_paused = true)]
async fn edge_lockout_without_via() {
    let executor = MockExecutor::new();
    executor.queue(common::edge_limited("3.0"));
    let limiter = RateLimiter::new(executor.clone());
    let now = Instant::now();

    // a 429 lacking the proxy's via header locks everything out
    assert!(limiter.execute(user_request()).await.is_ok());

    assert_eq!(2, executor.call_count());
    assert!(now.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn global_lockout_expires() {
    let executor = MockExecutor::new();
    executor.queue(common::globally_limited("2.0"));
    let limiter = RateLimiter::new(executor.clone());

    assert!(limiter.execute(user_request()).await.is_ok());
    assert!(!limiter.globally_locked());

    time::advance(Duration::from_secs(5)).await;

    assert!(!limiter.globally_locked());
    assert!(limiter.execute(gateway_request()).await.is_ok());
}
