//! Rate limiting middleware with per-role quotas.
//!
//! Buckets refill discretely: once `interval` has elapsed since the last
//! refill the bucket is reset to the full quota. There is no trickle between
//! boundaries, so a caller that spends its allotment waits for the boundary.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::auth::Identity;
use crate::config::{QuotaConfig, RateLimitConfig};
use crate::error::GatewayError;
use crate::lifecycle::MaintenanceTask;
use crate::observability::metrics;
use crate::security::client_ip;

/// Which limiter a bucket belongs to. Roles differ by key and quota only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterRole {
    /// Per-IP limit on every route.
    General,
    /// Tighter per-IP limit on credential submission.
    Login,
    /// Per-user limit on admin routes, falling back to IP.
    Admin,
}

impl LimiterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterRole::General => "general",
            LimiterRole::Login => "login",
            LimiterRole::Admin => "admin",
        }
    }

    fn keyed_by_user(&self) -> bool {
        matches!(self, LimiterRole::Admin)
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }
}

/// A keyed token-bucket limiter.
///
/// The map's shard locks guard bucket creation and removal; each bucket has
/// its own lock for the refill/decrement step.
pub struct RateLimiter {
    role: LimiterRole,
    rate: u32,
    interval: Duration,
    idle_ttl: Duration,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
}

impl RateLimiter {
    pub fn new(role: LimiterRole, quota: QuotaConfig, idle_multiple: u32) -> Self {
        let interval = quota.interval();
        Self {
            role,
            rate: quota.requests,
            interval,
            idle_ttl: interval.saturating_mul(idle_multiple.max(1)),
            buckets: DashMap::new(),
        }
    }

    pub fn role(&self) -> LimiterRole {
        self.role
    }

    pub fn check(&self, key: &str) -> RateDecision {
        let bucket = match self.buckets.get(key) {
            Some(entry) => entry.value().clone(),
            None => self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Bucket::full(self.rate))))
                .value()
                .clone(),
        };

        let mut bucket = bucket.lock();
        let now = Instant::now();
        bucket.last_seen = now;

        if now.duration_since(bucket.last_refill) >= self.interval {
            bucket.tokens = self.rate;
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            RateDecision::Allowed { remaining: bucket.tokens }
        } else {
            let retry_after = self
                .interval
                .saturating_sub(now.duration_since(bucket.last_refill));
            RateDecision::Limited { retry_after }
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        matches!(self.check(key), RateDecision::Allowed { .. })
    }

    /// Drop buckets idle for longer than the configured multiple of the interval.
    pub fn sweep(&self) -> usize {
        let before = self.buckets.len();
        let ttl = self.idle_ttl;
        self.buckets.retain(|_, bucket| bucket.lock().last_seen.elapsed() <= ttl);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(limiter = self.role.as_str(), removed, remaining = self.buckets.len(), "Swept idle rate-limit buckets");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Run [`RateLimiter::sweep`] once per idle window.
    pub fn start_sweeper(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> MaintenanceTask {
        let limiter = Arc::clone(self);
        MaintenanceTask::spawn("rate-limit-sweep", self.idle_ttl, shutdown, move || {
            limiter.sweep();
        })
    }
}

/// The three limiters the gateway runs.
#[derive(Clone)]
pub struct RateLimiters {
    pub general: Arc<RateLimiter>,
    pub login: Arc<RateLimiter>,
    pub admin: Arc<RateLimiter>,
    pub enabled: bool,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let build = |role, quota| Arc::new(RateLimiter::new(role, quota, config.idle_multiple));
        Self {
            general: build(LimiterRole::General, config.general),
            login: build(LimiterRole::Login, config.login),
            admin: build(LimiterRole::Admin, config.admin),
            enabled: config.enabled,
        }
    }

    pub fn start_sweepers(&self, shutdown: &crate::lifecycle::Shutdown) -> Vec<MaintenanceTask> {
        [&self.general, &self.login, &self.admin]
            .into_iter()
            .map(|limiter| limiter.start_sweeper(shutdown.subscribe()))
            .collect()
    }
}

/// State for one limiter middleware instance.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub enabled: bool,
}

/// Middleware function for rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let role = state.limiter.role();
    let key = match request.extensions().get::<Identity>() {
        Some(identity) if role.keyed_by_user() && !identity.is_anonymous() => {
            format!("user:{}", identity.user_id)
        }
        _ => format!("ip:{}", client_ip(&request)),
    };

    match state.limiter.check(&key) {
        RateDecision::Allowed { .. } => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            tracing::warn!(client = %key, limiter = role.as_str(), retry_after = ?retry_after, "Rate limit exceeded");
            metrics::record_rate_limited(role.as_str());
            GatewayError::RateLimited { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn limiter(rate: u32, interval_secs: u64) -> RateLimiter {
        RateLimiter::new(LimiterRole::General, QuotaConfig { requests: rate, interval_secs }, 10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_then_full_refill() {
        let rl = limiter(5, 60);
        for i in 0..5 {
            assert_eq!(rl.check("ip-A"), RateDecision::Allowed { remaining: 4 - i });
        }

        time::advance(Duration::from_secs(20)).await;
        assert_eq!(
            rl.check("ip-A"),
            RateDecision::Limited { retry_after: Duration::from_secs(40) }
        );

        time::advance(Duration::from_secs(40)).await;
        for _ in 0..5 {
            assert!(rl.allow("ip-A"));
        }
        assert!(!rl.allow("ip-A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_partial_refill_before_boundary() {
        let rl = limiter(2, 10);
        assert!(rl.allow("k"));
        assert!(rl.allow("k"));

        time::advance(Duration::from_millis(9_999)).await;
        assert!(!rl.allow("k"));

        time::advance(Duration::from_millis(1)).await;
        assert!(rl.allow("k"));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let rl = limiter(1, 60);
        assert!(rl.allow("ip-A"));
        assert!(!rl.allow("ip-A"));
        assert!(rl.allow("ip-B"));
        assert_eq!(rl.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_idle_buckets() {
        let rl = limiter(3, 1);
        rl.allow("stale");
        time::advance(Duration::from_secs(8)).await;
        rl.allow("fresh");
        time::advance(Duration::from_secs(3)).await;

        assert_eq!(rl.sweep(), 1);
        assert_eq!(rl.len(), 1);
        assert_eq!(rl.check("fresh"), RateDecision::Allowed { remaining: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_and_stops() {
        let shutdown = crate::lifecycle::Shutdown::new();
        let rl = Arc::new(limiter(1, 1));
        rl.allow("a");

        let task = rl.start_sweeper(shutdown.subscribe());
        time::sleep(Duration::from_secs(25)).await;
        assert!(rl.is_empty());

        task.stop().await;
    }

    #[test]
    fn test_roles_map_from_config() {
        let limiters = RateLimiters::from_config(&RateLimitConfig::default());
        assert_eq!(limiters.login.role(), LimiterRole::Login);
        assert!(LimiterRole::Admin.keyed_by_user());
        assert!(!LimiterRole::Login.keyed_by_user());
    }
}
