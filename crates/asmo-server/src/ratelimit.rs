//! Per-client-IP rate limiting (token bucket).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, rate: f64, capacity: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Allows `capacity` requests per `window` per client IP, refilling
/// continuously.
pub struct RateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
    capacity: f64,
    /// Tokens per second.
    rate: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        let window = window.as_secs_f64().max(f64::EPSILON);
        Self {
            buckets: DashMap::new(),
            capacity,
            rate: capacity / window,
        }
    }

    /// Take one token for `ip`. On refusal returns how long until the next
    /// token is available.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        let mut bucket = self
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::full(self.capacity));
        bucket.refill(self.rate, self.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let needed = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(needed / self.rate))
        }
    }

    /// Forget clients whose bucket has refilled completely.
    pub fn prune(&self) -> usize {
        let before = self.buckets.len();
        let (rate, capacity) = (self.rate, self.capacity);
        self.buckets.retain(|_, bucket| {
            bucket.refill(rate, capacity);
            bucket.tokens < capacity
        });
        before - self.buckets.len()
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

/// Axum middleware enforcing [`RateLimiter`]. Requests without a peer
/// address (in-process routers) pass through.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Some(ip) = ip {
        if let Err(retry_after) = limiter.check(ip) {
            let secs = retry_after.as_secs().max(1);
            tracing::warn!(client_ip = %ip, retry_after_secs = secs, "Rate limit exceeded");
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too many requests, please try again later." })),
            )
                .into_response();
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test(start_paused = true)]
    async fn allows_up_to_capacity() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check(ip(1)).is_ok());
        }
        let retry = limiter.check(ip(1)).unwrap_err();
        assert!(retry > Duration::ZERO);
        assert!(retry <= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        assert!(limiter.check(ip(2)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.check(ip(1)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_full_buckets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.check(ip(1)).unwrap();
        limiter.check(ip(2)).unwrap();
        assert_eq!(limiter.tracked(), 2);
        assert_eq!(limiter.prune(), 0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.prune(), 2);
        assert_eq!(limiter.tracked(), 0);
    }
}
