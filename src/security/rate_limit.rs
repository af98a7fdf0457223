//! Per-client rate limiting over a trailing window.
//!
//! # Algorithm
//! Each client identity owns a queue of accepted-request timestamps. On every
//! check the queue is pruned to entries with `now - t < window`; if what is
//! left has reached `limit` the request is rejected and NOT recorded,
//! otherwise `now` is appended. The window is measured from the current
//! request, not aligned to clock buckets.
//!
//! # Concurrency
//! Every identity owns its own mutex. The sharded `DashMap` is only held long
//! enough to fetch (or create) that mutex, so identities never contend with
//! each other, even inside one shard. Requests from one identity are
//! serialized, and `now` is read while holding the identity's lock, so each
//! queue stays in arrival order. The critical section never awaits.
//!
//! # Eviction
//! Identities whose newest timestamp has left the window are swept at most
//! once per `sweep_interval`, by whichever request notices first, after its
//! own lock has been released. A swept window is marked evicted; a request
//! that fetched it just before the sweep retries against a fresh entry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::observability::metrics;
use crate::pipeline::assembler::ChainError;
use crate::pipeline::registry::parse_params;
use crate::pipeline::{Outcome, RequestContext, Stage, StageError, VerdictStatus};

/// Result of a single limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Accepted; `count` requests (including this one) are in the window.
    Allowed { count: usize },
    /// Rejected; the window already holds `limit` requests.
    Limited,
}

#[derive(Debug, Default)]
struct ClientWindow {
    timestamps: VecDeque<Instant>,
    evicted: bool,
}

/// Trailing-window limiter keyed by client identity.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, Arc<Mutex<ClientWindow>>>,
    limit: usize,
    window: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
            sweep_interval: window,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Override how often stale identities are swept.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and record a request from `client` arriving now.
    pub fn check(&self, client: &str) -> Decision {
        self.check_with(client, Instant::now)
    }

    /// Check and record a request from `client` arriving at `now`.
    pub fn check_at(&self, client: &str, now: Instant) -> Decision {
        self.check_with(client, || now)
    }

    /// `clock` is read under the identity's lock.
    fn check_with(&self, client: &str, clock: impl Fn() -> Instant) -> Decision {
        let (decision, now) = loop {
            let slot = self.slot(client);
            let mut window = slot.lock();
            if window.evicted {
                continue;
            }

            let now = clock();
            // Timestamps are appended in arrival order, so stale ones sit at the front.
            while window
                .timestamps
                .front()
                .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
            {
                window.timestamps.pop_front();
            }

            let decision = if window.timestamps.len() >= self.limit {
                Decision::Limited
            } else {
                window.timestamps.push_back(now);
                Decision::Allowed { count: window.timestamps.len() }
            };
            break (decision, now);
        };

        self.maybe_sweep(now);
        decision
    }

    /// The identity's window; the map guard is released before returning.
    fn slot(&self, client: &str) -> Arc<Mutex<ClientWindow>> {
        if let Some(slot) = self.windows.get(client) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.windows.entry(client.to_string()).or_default().value())
    }

    /// Requests from `client` currently inside the window ending at `now`.
    pub fn count_at(&self, client: &str, now: Instant) -> usize {
        let Some(slot) = self.windows.get(client).map(|s| Arc::clone(s.value())) else {
            return 0;
        };
        let window = slot.lock();
        window
            .timestamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }

    /// Number of identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Drop identities with no timestamp inside the window ending at `now`.
    /// Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, slot| {
            let mut window = slot.lock();
            let live = window
                .timestamps
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window);
            if !live {
                window.evicted = true;
            }
            live
        });
        let removed = before.saturating_sub(self.windows.len());
        metrics::record_tracked_clients(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.windows.len(), "Swept idle rate-limit windows");
        }
        removed
    }

    fn maybe_sweep(&self, now: Instant) {
        // Only one caller sweeps; others skip instead of waiting.
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.saturating_duration_since(*last) < self.sweep_interval {
            return;
        }
        *last = now;
        drop(last);
        self.sweep(now);
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default = "default_window_seconds")]
    window_seconds: u64,
    #[serde(default)]
    sweep_interval_seconds: Option<u64>,
}

fn default_limit() -> usize {
    5
}

fn default_window_seconds() -> u64 {
    60
}

/// Rejects a client with 429 once it has `limit` accepted requests in the window.
#[derive(Debug)]
pub struct RateLimitStage {
    limiter: SlidingWindowLimiter,
}

impl RateLimitStage {
    pub const NAME: &'static str = "rate_limit";

    pub fn new(limiter: SlidingWindowLimiter) -> Self {
        Self { limiter }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, ChainError> {
        let params: RateLimitParams = parse_params(Self::NAME, params)?;
        let invalid = |reason: &str| ChainError::InvalidParameters {
            stage: Self::NAME.to_string(),
            reason: reason.to_string(),
        };

        if params.limit == 0 {
            return Err(invalid("limit must be greater than zero"));
        }
        if params.window_seconds == 0 {
            return Err(invalid("window_seconds must be greater than zero"));
        }
        if params.sweep_interval_seconds == Some(0) {
            return Err(invalid("sweep_interval_seconds must be greater than zero"));
        }

        let window = Duration::from_secs(params.window_seconds);
        let sweep = params.sweep_interval_seconds.map_or(window, Duration::from_secs);
        Ok(Self::new(
            SlidingWindowLimiter::new(params.limit, window).with_sweep_interval(sweep),
        ))
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Result<Outcome, StageError> {
        let client = ctx.client_identity();
        match self.limiter.check(client) {
            Decision::Allowed { count } => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    client = %client,
                    count,
                    limit = self.limiter.limit(),
                    "Rate limit OK"
                );
                Ok(Outcome::Continue)
            }
            Decision::Limited => {
                tracing::warn!(request_id = %ctx.request_id(), client = %client, "Rate limit exceeded");
                metrics::record_rate_limited();
                Ok(Outcome::reject(VerdictStatus::TooManyRequests, "Too Many Requests"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FileMetadata;
    use axum::body::Bytes;
    use axum::http::HeaderMap;
    use serde_json::json;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_sixth_request_in_window_is_limited() {
        let limiter = SlidingWindowLimiter::new(5, WINDOW);
        let t0 = Instant::now();

        for i in 0..5 {
            let d = limiter.check_at("1.2.3.4", t0 + Duration::from_secs(i));
            assert_eq!(d, Decision::Allowed { count: i as usize + 1 });
        }
        assert_eq!(limiter.check_at("1.2.3.4", t0 + Duration::from_secs(5)), Decision::Limited);
    }

    #[test]
    fn test_rejected_requests_do_not_count() {
        let limiter = SlidingWindowLimiter::new(2, WINDOW);
        let t0 = Instant::now();

        limiter.check_at("c", t0);
        limiter.check_at("c", t0 + Duration::from_secs(10));
        // Hammer while full; none of these are recorded.
        for s in 11..50 {
            assert_eq!(limiter.check_at("c", t0 + Duration::from_secs(s)), Decision::Limited);
        }
        assert_eq!(limiter.count_at("c", t0 + Duration::from_secs(50)), 2);

        // First accepted request leaves the window at exactly t0 + 60.
        assert_eq!(
            limiter.check_at("c", t0 + Duration::from_secs(60)),
            Decision::Allowed { count: 2 }
        );
        assert_eq!(limiter.check_at("c", t0 + Duration::from_secs(61)), Decision::Limited);
    }

    #[test]
    fn test_window_is_relative_to_now() {
        let limiter = SlidingWindowLimiter::new(3, WINDOW);
        let t0 = Instant::now();

        // Burst straddling the 60s mark is still capped against the latest request.
        limiter.check_at("c", t0 + Duration::from_secs(58));
        limiter.check_at("c", t0 + Duration::from_secs(59));
        limiter.check_at("c", t0 + Duration::from_secs(61));
        assert_eq!(limiter.check_at("c", t0 + Duration::from_secs(62)), Decision::Limited);
        assert_eq!(
            limiter.check_at("c", t0 + Duration::from_secs(119)),
            Decision::Allowed { count: 2 }
        );
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, WINDOW);
        let t0 = Instant::now();

        assert!(matches!(limiter.check_at("a", t0), Decision::Allowed { .. }));
        assert_eq!(limiter.check_at("a", t0), Decision::Limited);
        assert!(matches!(limiter.check_at("b", t0), Decision::Allowed { .. }));
    }

    #[test]
    fn test_sweep_evicts_idle_identities() {
        let limiter = SlidingWindowLimiter::new(5, WINDOW);
        let t0 = Instant::now();

        limiter.check_at("old", t0);
        limiter.check_at("fresh", t0 + Duration::from_secs(50));
        assert_eq!(limiter.tracked_clients(), 2);

        assert_eq!(limiter.sweep(t0 + Duration::from_secs(70)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.count_at("fresh", t0 + Duration::from_secs(70)), 1);
    }

    #[test]
    fn test_sweep_runs_on_interval() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(1))
            .with_sweep_interval(Duration::from_secs(1));
        let t0 = Instant::now();

        limiter.check_at("a", t0);
        limiter.check_at("b", t0);
        // Two windows later a check from "c" triggers the sweep of "a" and "b".
        limiter.check_at("c", t0 + Duration::from_secs(5));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_concurrent_same_identity_never_exceeds_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(5, WINDOW));
        let now = Instant::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .filter(|_| matches!(limiter.check_at("shared", now), Decision::Allowed { .. }))
                        .count()
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 5);
    }

    #[test]
    fn test_concurrent_checks_keep_arrival_order() {
        let limiter = Arc::new(SlidingWindowLimiter::new(10_000, WINDOW));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        limiter.check("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let slot = limiter.slot("shared");
        let window = slot.lock();
        assert_eq!(window.timestamps.len(), 1600);
        assert!(window.timestamps.iter().zip(window.timestamps.iter().skip(1)).all(|(a, b)| a <= b));
    }

    #[test]
    fn test_held_window_does_not_block_other_clients() {
        let limiter = SlidingWindowLimiter::new(5, WINDOW);
        let t0 = Instant::now();
        limiter.check_at("a", t0);

        let slot = limiter.slot("a");
        let _held = slot.lock();
        for i in 0..64 {
            let client = format!("10.0.0.{i}");
            assert!(matches!(limiter.check_at(&client, t0), Decision::Allowed { count: 1 }));
        }
    }

    #[test]
    fn test_swept_window_is_not_reused() {
        let limiter = SlidingWindowLimiter::new(5, WINDOW);
        let t0 = Instant::now();
        limiter.check_at("c", t0);

        let stale = limiter.slot("c");
        assert_eq!(limiter.sweep(t0 + Duration::from_secs(61)), 1);
        assert!(stale.lock().evicted);

        assert_eq!(
            limiter.check_at("c", t0 + Duration::from_secs(62)),
            Decision::Allowed { count: 1 }
        );
        assert!(!Arc::ptr_eq(&stale, &limiter.slot("c")));
        assert_eq!(stale.lock().timestamps.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_identities() {
        let stage = Arc::new(
            RateLimitStage::from_params(json!({ "limit": 3 }).as_object().unwrap()).unwrap(),
        );

        let mut tasks = Vec::new();
        for client in ["10.0.0.1", "10.0.0.2"] {
            for _ in 0..3 {
                let stage = stage.clone();
                tasks.push(tokio::spawn(async move {
                    let mut ctx =
                        RequestContext::new(client, HeaderMap::new(), FileMetadata::default(), Bytes::new());
                    stage.handle(&mut ctx).await.unwrap()
                }));
            }
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), Outcome::Continue);
        }
        let now = Instant::now();
        assert_eq!(stage.limiter().count_at("10.0.0.1", now), 3);
        assert_eq!(stage.limiter().count_at("10.0.0.2", now), 3);
    }

    #[tokio::test]
    async fn test_stage_rejects_with_429() {
        let stage = RateLimitStage::new(SlidingWindowLimiter::new(1, WINDOW));
        let mut ctx = RequestContext::new("9.9.9.9", HeaderMap::new(), FileMetadata::default(), Bytes::new());

        assert_eq!(stage.handle(&mut ctx).await.unwrap(), Outcome::Continue);
        match stage.handle(&mut ctx).await.unwrap() {
            Outcome::Terminate(v) => {
                assert_eq!(v.status_code().as_u16(), 429);
                assert_eq!(v.body()["error"], json!("Too Many Requests"));
            }
            Outcome::Continue => panic!("second request should be limited"),
        }
    }

    #[test]
    fn test_params() {
        let stage = RateLimitStage::from_params(&Map::new()).unwrap();
        assert_eq!(stage.limiter().limit(), 5);
        assert_eq!(stage.limiter().window(), Duration::from_secs(60));

        for bad in [json!({ "limit": 0 }), json!({ "window_seconds": 0 }), json!({ "limit": -1 })] {
            assert!(RateLimitStage::from_params(bad.as_object().unwrap()).is_err());
        }
    }
}
