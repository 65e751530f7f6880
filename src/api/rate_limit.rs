//! Fixed-window rate limiting, keyed by client address and route class.
//!
//! Counters live in the `rate_limits` table by default so every instance
//! sharing the database enforces the same windows. The DashMap store is a
//! single-process fallback.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::error::ApiError;
use crate::config::{RateLimitBackend, RateLimitConfig, RouteLimit};
use crate::db::{self, DbError};
use crate::AppState;

/// Route classes with independent windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// `POST /api/auth/login`
    Login,
    /// Authenticated PATCH/DELETE/POST other than quote creation
    Mutation,
    /// Staff `POST /api/quotes`
    QuoteCreate,
    /// Unauthenticated quote and contact forms
    PublicForm,
}

impl RateLimitTier {
    fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Login => "login",
            RateLimitTier::Mutation => "mutation",
            RateLimitTier::QuoteCreate => "quote_create",
            RateLimitTier::PublicForm => "public_form",
        }
    }
}

/// Outcome of one counted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window ends
    pub reset_at_ms: i64,
}

impl RateLimitDecision {
    fn unlimited(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at_ms: 0,
        }
    }

    /// Whole seconds until the window resets, at least 1
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let ms = (self.reset_at_ms - now_ms).max(0) as u64;
        ms.div_ceil(1000).max(1)
    }
}

/// Counter backend. `hit` records one request and returns the count and
/// window start after it was applied.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<(i64, i64), DbError>;
}

/// Counters in the shared `rate_limits` table
pub struct SqliteRateLimitStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteRateLimitStore {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl RateLimitStore for SqliteRateLimitStore {
    async fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<(i64, i64), DbError> {
        // Single upsert statement, so concurrent hits on one key serialize in SQLite
        db::bounded(self.timeout, async {
            let row: (i64, i64) = sqlx::query_as(
                r#"
                INSERT INTO rate_limits (key, count, window_start_ms) VALUES (?1, 1, ?2)
                ON CONFLICT(key) DO UPDATE SET
                    count = CASE WHEN rate_limits.window_start_ms + ?3 <= ?2
                        THEN 1 ELSE rate_limits.count + 1 END,
                    window_start_ms = CASE WHEN rate_limits.window_start_ms + ?3 <= ?2
                        THEN ?2 ELSE rate_limits.window_start_ms END
                RETURNING count, window_start_ms
                "#,
            )
            .bind(key)
            .bind(now_ms)
            .bind(window_ms)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        })
        .await
    }
}

/// Finished windows are swept once every this many hits
const MEMORY_SWEEP_INTERVAL: u64 = 1024;

/// Process-local counters; only correct with a single instance
#[derive(Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, (i64, i64)>,
    hits: AtomicU64,
    // Tiers share the map, so sweeps use the longest window seen
    longest_window_ms: AtomicI64,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows that ended before `now_ms`
    pub fn cleanup_expired(&self, now_ms: i64, window_ms: i64) {
        self.entries
            .retain(|_, (_, window_start)| *window_start + window_ms > now_ms);
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<(i64, i64), DbError> {
        let longest = self
            .longest_window_ms
            .fetch_max(window_ms, Ordering::Relaxed)
            .max(window_ms);
        // Sweep before taking the entry guard; retain locks every shard
        if (self.hits.fetch_add(1, Ordering::Relaxed) + 1) % MEMORY_SWEEP_INTERVAL == 0 {
            self.cleanup_expired(now_ms, longest);
        }

        let mut entry = self.entries.entry(key.to_string()).or_insert((0, now_ms));
        let (count, window_start) = entry.value_mut();
        if *window_start + window_ms <= now_ms {
            *count = 0;
            *window_start = now_ms;
        }
        *count += 1;
        Ok((*count, *window_start))
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, pool: SqlitePool, timeout: Duration) -> Self {
        let store: Arc<dyn RateLimitStore> = match config.backend {
            RateLimitBackend::Database => Arc::new(SqliteRateLimitStore::new(pool, timeout)),
            RateLimitBackend::Memory => Arc::new(MemoryRateLimitStore::new()),
        };
        Self::with_store(config.clone(), store)
    }

    pub fn with_store(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn limit_for(&self, tier: RateLimitTier) -> RouteLimit {
        match tier {
            RateLimitTier::Login => self.config.login,
            RateLimitTier::Mutation => self.config.mutation,
            RateLimitTier::QuoteCreate => self.config.quote_create,
            RateLimitTier::PublicForm => self.config.public_form,
        }
    }

    pub async fn check(&self, client_key: &str, tier: RateLimitTier) -> RateLimitDecision {
        self.check_at(client_key, tier, Utc::now().timestamp_millis())
            .await
    }

    /// Count one request at `now_ms`. A store failure lets the request
    /// through and is logged.
    pub async fn check_at(
        &self,
        client_key: &str,
        tier: RateLimitTier,
        now_ms: i64,
    ) -> RateLimitDecision {
        let limit = self.limit_for(tier);
        if !self.config.enabled {
            return RateLimitDecision::unlimited(limit.max_requests);
        }

        let window_ms = limit.window().as_millis() as i64;
        let key = format!("{}:{}", tier.as_str(), client_key);

        match self.store.hit(&key, now_ms, window_ms).await {
            Ok((count, window_start)) => {
                let max = i64::from(limit.max_requests);
                RateLimitDecision {
                    allowed: count <= max,
                    limit: limit.max_requests,
                    remaining: (max - count).max(0) as u32,
                    reset_at_ms: window_start + window_ms,
                }
            }
            Err(e) => {
                tracing::warn!(tier = tier.as_str(), error = %e, "Rate limiter unavailable; allowing request");
                RateLimitDecision::unlimited(limit.max_requests)
            }
        }
    }
}

/// Client address: proxy headers first, then the socket peer
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());

    [
        forwarded,
        headers.get("x-real-ip").and_then(|v| v.to_str().ok()),
        headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|v| !v.is_empty())
    .map(str::to_string)
    .or_else(|| peer.map(|addr| addr.ip().to_string()))
    .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_login(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Login).await
}

pub async fn rate_limit_mutation(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::Mutation).await
}

/// Quote routes: creation has its own window, edits count as mutations
pub async fn rate_limit_quotes(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let tier = if request.method() == Method::POST {
        RateLimitTier::QuoteCreate
    } else {
        RateLimitTier::Mutation
    };
    rate_limit_with_tier(state, request, next, tier).await
}

pub async fn rate_limit_public_form(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    rate_limit_with_tier(state, request, next, RateLimitTier::PublicForm).await
}

async fn rate_limit_with_tier(
    state: Arc<AppState>,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    let method = request.method();
    if !state.rate_limiter.is_enabled()
        || method == Method::GET
        || method == Method::HEAD
        || method == Method::OPTIONS
    {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    let now_ms = Utc::now().timestamp_millis();
    let decision = state.rate_limiter.check_at(&key, tier, now_ms).await;
    let reset_after = decision.retry_after_secs(now_ms);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(tier = tier.as_str(), "Rate limit exceeded");
        let mut response = ApiError::rate_limited(reset_after).into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(reset_after));
        response
    };

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(backend: RateLimitBackend) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            backend,
            login: RouteLimit::new(5, 60),
            mutation: RouteLimit::new(10, 60),
            quote_create: RouteLimit::new(3, 60),
            public_form: RouteLimit::new(2, 60),
        }
    }

    fn memory_limiter() -> RateLimiter {
        RateLimiter::with_store(
            test_config(RateLimitBackend::Memory),
            Arc::new(MemoryRateLimitStore::new()),
        )
    }

    async fn assert_window_behaviour(limiter: &RateLimiter) {
        let start = 1_700_000_000_000;
        for i in 0..5 {
            let d = limiter
                .check_at("10.0.0.1", RateLimitTier::Login, start + i * 1000)
                .await;
            assert!(d.allowed, "request {} should be allowed", i + 1);
            assert_eq!(d.remaining, 4 - i as u32);
        }

        let sixth = limiter
            .check_at("10.0.0.1", RateLimitTier::Login, start + 10_000)
            .await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.reset_at_ms, start + 60_000);
        assert_eq!(sixth.retry_after_secs(start + 10_000), 50);

        let next_window = limiter
            .check_at("10.0.0.1", RateLimitTier::Login, start + 60_000)
            .await;
        assert!(next_window.allowed);
        assert_eq!(next_window.remaining, 4);
    }

    #[tokio::test]
    async fn test_memory_window_allows_then_rejects_then_resets() {
        assert_window_behaviour(&memory_limiter()).await;
    }

    #[tokio::test]
    async fn test_database_window_allows_then_rejects_then_resets() {
        let pool = db::connect_in_memory().await.unwrap();
        let limiter = RateLimiter::new(
            &test_config(RateLimitBackend::Database),
            pool,
            Duration::from_secs(5),
        );
        assert_window_behaviour(&limiter).await;
    }

    #[tokio::test]
    async fn test_keys_and_tiers_are_independent() {
        let limiter = memory_limiter();
        let now = 1_700_000_000_000;

        for _ in 0..2 {
            assert!(limiter.check_at("a", RateLimitTier::PublicForm, now).await.allowed);
        }
        assert!(!limiter.check_at("a", RateLimitTier::PublicForm, now).await.allowed);
        assert!(limiter.check_at("b", RateLimitTier::PublicForm, now).await.allowed);
        assert!(limiter.check_at("a", RateLimitTier::Mutation, now).await.allowed);
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let mut config = test_config(RateLimitBackend::Memory);
        config.enabled = false;
        let limiter = RateLimiter::with_store(config, Arc::new(MemoryRateLimitStore::new()));
        for _ in 0..50 {
            assert!(limiter.check("a", RateLimitTier::QuoteCreate).await.allowed);
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn hit(&self, _: &str, _: i64, _: i64) -> Result<(i64, i64), DbError> {
            Err(DbError::Timeout(Duration::from_millis(1)))
        }
    }

    #[tokio::test]
    async fn test_store_failure_allows_request() {
        let limiter =
            RateLimiter::with_store(test_config(RateLimitBackend::Database), Arc::new(FailingStore));
        for _ in 0..10 {
            assert!(limiter.check("a", RateLimitTier::Login).await.allowed);
        }
    }

    #[tokio::test]
    async fn test_memory_cleanup_drops_finished_windows() {
        let store = MemoryRateLimitStore::new();
        store.hit("old", 0, 1000).await.unwrap();
        store.hit("fresh", 5_000, 1000).await.unwrap();
        store.cleanup_expired(5_500, 1000);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_sweeps_during_hits() {
        let store = MemoryRateLimitStore::new();
        for i in 0..(MEMORY_SWEEP_INTERVAL - 1) {
            store.hit(&format!("client-{}", i), 0, 1000).await.unwrap();
        }
        assert_eq!(store.entry_count(), (MEMORY_SWEEP_INTERVAL - 1) as usize);

        // Every earlier window has ended by now, so the sweep leaves only this key
        store.hit("late", 10_000, 1000).await.unwrap();
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_sweep_keeps_longer_windows() {
        let store = MemoryRateLimitStore::new();
        store.hit("long", 0, 60_000).await.unwrap();
        for i in 0..(MEMORY_SWEEP_INTERVAL - 2) {
            store.hit(&format!("short-{}", i), 0, 1000).await.unwrap();
        }
        // Triggers the sweep while "long" is still mid-window
        store.hit("late", 10_000, 1000).await.unwrap();
        assert_eq!(store.hit("long", 20_000, 60_000).await.unwrap(), (2, 0));
    }

    #[test]
    fn test_client_key_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "192.168.1.9:5000".parse().unwrap();
        assert_eq!(client_key(&headers, None), "unknown");
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.9");

        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_key(&headers, Some(peer)), "10.1.1.1");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }
}
