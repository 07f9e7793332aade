//! Fixed-window rate limiting for the authentication endpoints.
//!
//! Only requests under [`AUTH_PATH`] are counted. With `skip_successful`
//! a response below 400 gives its hit back, so the limit effectively counts
//! failed attempts (bad passwords, unknown users).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::http::connection::client_ip;

pub const AUTH_PATH: &str = "/v1/auth";
pub const LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Stale windows are swept once the table grows past this many clients,
/// at most once per window length.
const PRUNE_THRESHOLD: usize = 10_000;

struct Window {
    started: Instant,
    hits: u32,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

/// Per-client hit counters. One instance per assembled pipeline.
pub struct RateLimiterState {
    windows: DashMap<String, Window>,
    window: Duration,
    max_requests: u32,
    skip_successful: bool,
    trust_forwarded: bool,
    created: Instant,
    /// Milliseconds after `created` of the last sweep.
    last_prune_ms: AtomicU64,
}

impl RateLimiterState {
    pub fn new(config: &RateLimitConfig, trust_forwarded: bool) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
            skip_successful: config.skip_successful,
            trust_forwarded,
            created: Instant::now(),
            last_prune_ms: AtomicU64::new(0),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Count one request for `key`.
    pub fn hit(&self, key: &str) -> Decision {
        self.hit_at(key, Instant::now())
    }

    fn hit_at(&self, key: &str, now: Instant) -> Decision {
        self.prune_if_due(now);

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            hits: 0,
        });
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            window.started = now;
            window.hits = 0;
        }
        window.hits = window.hits.saturating_add(1);

        if window.hits > self.max_requests {
            let elapsed = now.saturating_duration_since(window.started);
            Decision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        } else {
            Decision::Allowed {
                remaining: self.max_requests - window.hits,
            }
        }
    }

    /// Give back one hit, e.g. after a successful response.
    pub fn refund(&self, key: &str) {
        if let Some(mut window) = self.windows.get_mut(key) {
            window.hits = window.hits.saturating_sub(1);
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Sweep expired windows if the table is over the threshold and no
    /// sweep ran within the last window. Returns whether it swept.
    fn prune_if_due(&self, now: Instant) -> bool {
        if self.windows.len() <= PRUNE_THRESHOLD {
            return false;
        }

        let now_ms = u64::try_from(now.saturating_duration_since(self.created).as_millis())
            .unwrap_or(u64::MAX);
        let window_ms = u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX);
        let last = self.last_prune_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < window_ms {
            return false;
        }
        // One caller wins the sweep; concurrent hits skip it.
        if self
            .last_prune_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.prune(now);
        tracing::debug!(clients = self.windows.len(), "Swept expired rate-limit windows");
        true
    }

    fn prune(&self, now: Instant) {
        let window = self.window;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
    }
}

/// Whether `path` falls under the auth mount (segment-aligned).
pub fn is_auth_path(path: &str) -> bool {
    path.strip_prefix(AUTH_PATH)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Middleware limiting repeated requests to the auth endpoints.
pub async fn auth_rate_limit(
    State(state): State<Arc<RateLimiterState>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_auth_path(request.uri().path()) {
        return next.run(request).await;
    }

    let key = client_ip(&request, state.trust_forwarded)
        .map_or_else(|| "unknown".to_string(), |ip| ip.to_string());

    match state.hit(&key) {
        Decision::Limited { retry_after } => {
            tracing::warn!(client = %key, retry_after_secs = retry_after.as_secs(), "Auth rate limit exceeded");
            let mut response = (StatusCode::TOO_MANY_REQUESTS, LIMIT_MESSAGE).into_response();
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
            set_limit_headers(&mut response, state.max_requests, 0);
            response
        }
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            if state.skip_successful && response.status().as_u16() < 400 {
                state.refund(&key);
            }
            set_limit_headers(&mut response, state.max_requests, remaining);
            response
        }
    }
}

fn set_limit_headers(response: &mut Response, limit: u32, remaining: u32) {
    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiterState {
        RateLimiterState::new(
            &RateLimitConfig {
                window_secs: 60,
                max_requests,
                skip_successful: true,
            },
            false,
        )
    }

    #[test]
    fn limits_after_max_hits() {
        let state = limiter(2);
        assert_eq!(state.hit("a"), Decision::Allowed { remaining: 1 });
        assert_eq!(state.hit("a"), Decision::Allowed { remaining: 0 });
        assert!(matches!(state.hit("a"), Decision::Limited { .. }));
        // Other clients are unaffected.
        assert_eq!(state.hit("b"), Decision::Allowed { remaining: 1 });
    }

    #[test]
    fn refund_returns_a_hit() {
        let state = limiter(1);
        assert_eq!(state.hit("a"), Decision::Allowed { remaining: 0 });
        state.refund("a");
        assert_eq!(state.hit("a"), Decision::Allowed { remaining: 0 });
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let state = limiter(1);
        let start = Instant::now();
        assert_eq!(state.hit_at("a", start), Decision::Allowed { remaining: 0 });
        assert!(matches!(
            state.hit_at("a", start + Duration::from_secs(30)),
            Decision::Limited { retry_after } if retry_after == Duration::from_secs(30)
        ));
        assert_eq!(
            state.hit_at("a", start + Duration::from_secs(61)),
            Decision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn prune_drops_expired_windows() {
        let state = limiter(5);
        let start = Instant::now();
        state.hit_at("old", start);
        state.prune(start + Duration::from_secs(120));
        assert_eq!(state.tracked_clients(), 0);
    }

    #[test]
    fn sweeps_at_most_once_per_window() {
        let state = limiter(5);
        let start = Instant::now();
        let fill = |at: Instant| {
            for i in 0..=PRUNE_THRESHOLD {
                state.hit_at(&format!("client-{i}"), at);
            }
        };

        fill(start);
        assert!(!state.prune_if_due(start + Duration::from_secs(1)));

        assert!(state.prune_if_due(start + Duration::from_secs(61)));
        assert_eq!(state.tracked_clients(), 0);

        // Still over the threshold, but a sweep just ran.
        fill(start + Duration::from_secs(61));
        assert!(!state.prune_if_due(start + Duration::from_secs(62)));
        state.hit_at("late", start + Duration::from_secs(62));
        assert_eq!(state.tracked_clients(), PRUNE_THRESHOLD + 2);

        assert!(state.prune_if_due(start + Duration::from_secs(122)));
        assert_eq!(state.tracked_clients(), 1);
    }

    #[test]
    fn small_tables_are_never_swept() {
        let state = limiter(5);
        let start = Instant::now();
        state.hit_at("a", start);
        assert!(!state.prune_if_due(start + Duration::from_secs(600)));
        assert_eq!(state.tracked_clients(), 1);
    }

    #[test]
    fn auth_path_matching_is_segment_aligned() {
        assert!(is_auth_path("/v1/auth"));
        assert!(is_auth_path("/v1/auth/login"));
        assert!(!is_auth_path("/v1/authors"));
        assert!(!is_auth_path("/v1/users"));
    }
}
