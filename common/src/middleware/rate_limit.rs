//! Per-client rate limiting.
//!
//! Fixed-window request counter keyed by the peer IP address. Limits are
//! written as `<count>/<unit>` or `<count> per <unit>`, optionally with a
//! window multiplier: `100/hour`, `10 per minute`, `50/5 minutes`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;

/// Parsed rate limit: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl FromStr for RateLimit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::config(format!("invalid rate limit '{s}'"));
        let normalized = s.trim().to_lowercase().replace(" per ", "/");
        let (count, period) = normalized.split_once('/').ok_or_else(invalid)?;

        let max_requests: u32 = count.trim().parse().map_err(|_| invalid())?;
        if max_requests == 0 {
            return Err(invalid());
        }

        let period = period.trim();
        let split = period
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(period.len());
        let (multiplier, unit) = period.split_at(split);
        let multiplier: u64 = if multiplier.is_empty() {
            1
        } else {
            multiplier.parse().map_err(|_| invalid())?
        };
        let unit_secs = match unit.trim().trim_end_matches('s') {
            "second" | "sec" => 1,
            "minute" | "min" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            _ => return Err(invalid()),
        };
        if multiplier == 0 {
            return Err(invalid());
        }

        Ok(Self {
            max_requests,
            window: Duration::from_secs(unit_secs * multiplier),
        })
    }
}

/// Shared fixed-window limiter.
pub struct RateLimiter {
    limit: RateLimit,
    windows: Mutex<HashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Counts one request for `key`. Returns the time left in the current
    /// window when the key is over its limit.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let entry = windows.entry(key.to_string()).or_insert((0, now));

        if now.duration_since(entry.1) >= self.limit.window {
            *entry = (0, now);
        }
        if entry.0 >= self.limit.max_requests {
            return Err(self.limit.window.saturating_sub(now.duration_since(entry.1)));
        }
        entry.0 += 1;
        Ok(())
    }

    /// Drops expired windows. Called periodically.
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.limit.window;
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, (_, start)| now.duration_since(*start) < window);
    }

    /// Number of tracked clients.
    pub fn tracked(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

/// Rate limit middleware handler.
///
/// Keys on the peer address; requests served without connection info
/// (e.g. in-process tests) share the `unknown` bucket.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let key = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if let Err(retry_in) = limiter.check(&key) {
        tracing::warn!(client = %key, retry_in_secs = retry_in.as_secs(), "Rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_parse_rate_limits() {
        assert_eq!(
            "100/hour".parse::<RateLimit>().unwrap(),
            RateLimit { max_requests: 100, window: Duration::from_secs(3600) }
        );
        assert_eq!(
            "10 per minute".parse::<RateLimit>().unwrap(),
            RateLimit { max_requests: 10, window: Duration::from_secs(60) }
        );
        assert_eq!(
            "50/5 minutes".parse::<RateLimit>().unwrap(),
            RateLimit { max_requests: 50, window: Duration::from_secs(300) }
        );
        assert_eq!(
            "1/Day".parse::<RateLimit>().unwrap().window,
            Duration::from_secs(86_400)
        );
        assert!("hour".parse::<RateLimit>().is_err());
        assert!("0/hour".parse::<RateLimit>().is_err());
        assert!("10/fortnight".parse::<RateLimit>().is_err());
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(RateLimit {
            max_requests: 2,
            window: Duration::from_secs(60),
        });
        let start = Instant::now();
        assert!(limiter.check_at("a", start).is_ok());
        assert!(limiter.check_at("a", start).is_ok());
        assert!(limiter.check_at("a", start).is_err());
        // Other clients are independent.
        assert!(limiter.check_at("b", start).is_ok());
        // A new window starts after the old one elapses.
        assert!(limiter.check_at("a", start + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn test_prune_keeps_active_windows() {
        let limiter = RateLimiter::new("5/hour".parse().unwrap());
        limiter.check("a").unwrap();
        limiter.prune();
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test]
    async fn test_middleware_returns_429() {
        let limiter = Arc::new(RateLimiter::new("1/hour".parse().unwrap()));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let first = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
