pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod lifecycle;
pub mod notifications;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::auth::{LockoutTracker, PasswordVerifier, PermissionResolver, SessionStore};
use crate::lifecycle::Lifecycle;
use crate::notifications::Notifier;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub passwords: PasswordVerifier,
    pub sessions: SessionStore,
    pub lockout: LockoutTracker,
    pub permissions: PermissionResolver,
    pub rate_limiter: RateLimiter,
    pub lifecycle: Lifecycle,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let notifier = notifications::from_config(&config.email);
        Self::with_notifier(config, db, notifier)
    }

    /// Build the state around an explicit notifier
    pub fn with_notifier(config: Config, db: DbPool, notifier: Arc<dyn Notifier>) -> Self {
        let timeout = config.database.query_timeout();
        Self {
            passwords: PasswordVerifier::new(&config.auth),
            sessions: SessionStore::new(db.clone(), &config.auth, timeout),
            lockout: LockoutTracker::new(db.clone(), &config.auth, timeout),
            permissions: PermissionResolver::new(db.clone(), timeout),
            rate_limiter: RateLimiter::new(&config.rate_limit, db.clone(), timeout),
            lifecycle: Lifecycle::new(db.clone(), timeout),
            notifier,
            config,
            db,
        }
    }
}
