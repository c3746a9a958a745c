//! Token-bucket rate limiting
//!
//! One process-wide limiter shared by every execution. Buckets are keyed by
//! (scope, key), created lazily on first use and evicted after inactivity.
//! Each bucket refills at `capacity / period` tokens per second.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BlueprintError, ErrorCode, Result};

/// What a bucket is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateScope {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "blueprint")]
    Blueprint,
    #[serde(rename = "user+blueprint")]
    UserBlueprint,
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "global")]
    Global,
}

impl RateScope {
    /// Bucket key for this scope
    pub fn key(&self, user_id: &str, blueprint_id: &str, api: &str) -> String {
        match self {
            RateScope::User => user_id.to_string(),
            RateScope::Blueprint => blueprint_id.to_string(),
            RateScope::UserBlueprint => format!("{}:{}", user_id, blueprint_id),
            RateScope::Api => api.to_string(),
            RateScope::Global => "*".to_string(),
        }
    }
}

/// Limit for one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub scope: RateScope,
    /// Bucket size (burst)
    pub capacity: u32,
    /// Time to refill a full bucket
    pub period_secs: u64,
}

impl RateLimitRule {
    pub fn new(scope: RateScope, capacity: u32, period: Duration) -> Self {
        Self {
            scope,
            capacity,
            period_secs: period.as_secs().max(1),
        }
    }

    pub fn per_minute(scope: RateScope, capacity: u32) -> Self {
        Self::new(scope, capacity, Duration::from_secs(60))
    }

    fn refill_per_sec(&self) -> f64 {
        self.capacity as f64 / self.period_secs.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub rules: Vec<RateLimitRule>,
    /// Buckets untouched for this long are dropped
    pub idle_eviction_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            idle_eviction_secs: 600,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Bucket
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    fn new(rule: &RateLimitRule, now: Instant) -> Self {
        Self {
            capacity: rule.capacity as f64,
            tokens: rule.capacity as f64,
            refill_per_sec: rule.refill_per_sec(),
            last_refill: now,
            last_used: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_used = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn has_token(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_used = now;
        self.tokens >= 1.0
    }

    fn balance(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn retry_after(&self) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(((1.0 - self.tokens).max(0.0)) / self.refill_per_sec)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rate Limiter
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RateLimiter {
    rules: HashMap<RateScope, RateLimitRule>,
    buckets: DashMap<(RateScope, String), Mutex<TokenBucket>>,
    idle_eviction: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let mut rules = HashMap::new();
        for rule in config.rules {
            if rules.insert(rule.scope, rule.clone()).is_some() {
                warn!(scope = ?rule.scope, "Duplicate rate limit rule, keeping the last one");
            }
        }
        Self {
            rules,
            buckets: DashMap::new(),
            idle_eviction: Duration::from_secs(config.idle_eviction_secs),
        }
    }

    pub fn rule(&self, scope: RateScope) -> Option<&RateLimitRule> {
        self.rules.get(&scope)
    }

    /// Take one token for (scope, key). Scopes without a rule always pass.
    pub fn check(&self, scope: RateScope, key: &str) -> Result<()> {
        self.check_at(scope, key, Instant::now())
    }

    pub fn check_at(&self, scope: RateScope, key: &str, now: Instant) -> Result<()> {
        self.with_bucket(scope, key, now, |bucket| bucket.try_acquire(now))
    }

    /// Take one token from every (scope, key), or none when any of them is
    /// exhausted.
    pub fn check_all(&self, checks: &[(RateScope, String)]) -> Result<()> {
        self.check_all_at(checks, Instant::now())
    }

    pub fn check_all_at(&self, checks: &[(RateScope, String)], now: Instant) -> Result<()> {
        for (scope, key) in checks {
            self.with_bucket(*scope, key, now, |bucket| bucket.has_token(now))?;
        }
        for (scope, key) in checks {
            self.check_at(*scope, key, now)?;
        }
        Ok(())
    }

    fn with_bucket(
        &self,
        scope: RateScope,
        key: &str,
        now: Instant,
        admit: impl FnOnce(&mut TokenBucket) -> bool,
    ) -> Result<()> {
        let Some(rule) = self.rules.get(&scope) else {
            return Ok(());
        };

        let entry = self
            .buckets
            .entry((scope, key.to_string()))
            .or_insert_with(|| Mutex::new(TokenBucket::new(rule, now)));
        let mut bucket = entry.lock();

        if admit(&mut *bucket) {
            return Ok(());
        }

        let retry_after = bucket.retry_after();
        debug!(scope = ?scope, key = %key, "Rate limit exceeded");
        Err(BlueprintError::security(
            ErrorCode::RateLimited,
            format!(
                "rate limit of {} per {}s exceeded for {:?} '{}'",
                rule.capacity, rule.period_secs, scope, key
            ),
        )
        .with_detail("retryAfterMs", retry_after.as_millis().min(i64::MAX as u128) as i64))
    }

    /// Current token balance, if the bucket exists
    pub fn balance(&self, scope: RateScope, key: &str) -> Option<f64> {
        self.balance_at(scope, key, Instant::now())
    }

    pub fn balance_at(&self, scope: RateScope, key: &str, now: Instant) -> Option<f64> {
        self.buckets
            .get(&(scope, key.to_string()))
            .map(|b| b.lock().balance(now))
    }

    /// Drop buckets idle for longer than the eviction window
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        let window = self.idle_eviction;
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_used) < window);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            rules: vec![RateLimitRule::per_minute(RateScope::UserBlueprint, capacity)],
            idle_eviction_secs: 60,
        })
    }

    #[test]
    fn test_bucket_exhausts() {
        let rl = limiter(2);
        let now = Instant::now();
        assert!(rl.check_at(RateScope::UserBlueprint, "u:bp", now).is_ok());
        assert!(rl.check_at(RateScope::UserBlueprint, "u:bp", now).is_ok());
        let err = rl
            .check_at(RateScope::UserBlueprint, "u:bp", now)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);

        // Other keys are independent
        assert!(rl.check_at(RateScope::UserBlueprint, "v:bp", now).is_ok());
    }

    #[test]
    fn test_unconfigured_scope_passes() {
        let rl = limiter(1);
        for _ in 0..10 {
            assert!(rl.check(RateScope::Global, "*").is_ok());
        }
        assert!(rl.is_empty());
    }

    #[test]
    fn test_balance_monotonic() {
        let rl = limiter(60);
        let t0 = Instant::now();
        rl.check_at(RateScope::UserBlueprint, "k", t0).unwrap();
        let b0 = rl.balance_at(RateScope::UserBlueprint, "k", t0).unwrap();
        assert!((b0 - 59.0).abs() < 1e-9);

        // Strictly decreasing per accepted request
        rl.check_at(RateScope::UserBlueprint, "k", t0).unwrap();
        let b1 = rl.balance_at(RateScope::UserBlueprint, "k", t0).unwrap();
        assert!(b1 < b0);

        // Non-decreasing without requests, capped at capacity
        let mut last = b1;
        for secs in [1, 2, 10, 120] {
            let b = rl
                .balance_at(RateScope::UserBlueprint, "k", t0 + Duration::from_secs(secs))
                .unwrap();
            assert!(b >= last);
            assert!(b <= 60.0);
            last = b;
        }
        assert!((last - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_refill_rate() {
        let rl = limiter(2);
        let t0 = Instant::now();
        rl.check_at(RateScope::UserBlueprint, "k", t0).unwrap();
        rl.check_at(RateScope::UserBlueprint, "k", t0).unwrap();
        assert!(rl.check_at(RateScope::UserBlueprint, "k", t0).is_err());
        // 2 per 60s refills one token every 30s
        assert!(rl
            .check_at(RateScope::UserBlueprint, "k", t0 + Duration::from_secs(31))
            .is_ok());
    }

    #[test]
    fn test_idle_eviction() {
        let rl = limiter(5);
        let t0 = Instant::now();
        rl.check_at(RateScope::UserBlueprint, "a", t0).unwrap();
        rl.check_at(RateScope::UserBlueprint, "b", t0 + Duration::from_secs(50))
            .unwrap();
        assert_eq!(rl.evict_idle_at(t0 + Duration::from_secs(90)), 1);
        assert_eq!(rl.len(), 1);
        assert!(rl.balance(RateScope::UserBlueprint, "b").is_some());
    }

    #[test]
    fn test_check_all_spends_nothing_when_one_scope_is_exhausted() {
        let rl = RateLimiter::new(RateLimitConfig {
            rules: vec![
                RateLimitRule::per_minute(RateScope::UserBlueprint, 2),
                RateLimitRule::per_minute(RateScope::Blueprint, 1),
            ],
            idle_eviction_secs: 60,
        });
        let now = Instant::now();
        let alice = [
            (RateScope::UserBlueprint, "alice:bp".to_string()),
            (RateScope::Blueprint, "bp".to_string()),
        ];
        assert!(rl.check_all_at(&alice, now).is_ok());

        let err = rl.check_all_at(&alice, now).unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
        assert!(err.message.contains("Blueprint 'bp'"));

        // The rejected call left the user+blueprint bucket untouched
        let balance = rl.balance_at(RateScope::UserBlueprint, "alice:bp", now).unwrap();
        assert!((balance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(RateScope::UserBlueprint.key("u", "bp", "x"), "u:bp");
        assert_eq!(RateScope::Global.key("u", "bp", "x"), "*");
        let json = serde_json::to_string(&RateScope::UserBlueprint).unwrap();
        assert_eq!(json, "\"user+blueprint\"");
    }
}
