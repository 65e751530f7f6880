use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Set the `Secure` attribute on the session cookie (enable behind TLS)
    #[serde(default)]
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            secure_cookies: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path relative to `server.data_dir`, or `sqlite::memory:`
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound for any single persistence round-trip
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_db_path() -> String {
    "leadgate.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

/// Which password hash scheme new hashes are produced with
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PasswordScheme {
    /// bcrypt (`$2b$`)
    #[default]
    Adaptive,
    /// Salted SHA-256 hex digest, for environments without bcrypt
    Legacy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Salt mixed into legacy SHA-256 password digests. Must be identical
    /// across restarts and instances. Without it legacy digests never verify.
    #[serde(default)]
    pub server_secret: Option<String>,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: i64,
    #[serde(default = "default_lockout_minutes")]
    pub lockout_minutes: i64,
    #[serde(default)]
    pub password_scheme: PasswordScheme,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    /// Bootstrap admin password, only used while the users table is empty
    pub admin_password: Option<String>,
}

impl AuthConfig {
    /// The configured legacy salt, ignoring a blank value
    pub fn legacy_secret(&self) -> Option<&str> {
        self.server_secret.as_deref().filter(|s| !s.trim().is_empty())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server_secret: None,
            session_ttl_hours: default_session_ttl_hours(),
            lockout_threshold: default_lockout_threshold(),
            lockout_minutes: default_lockout_minutes(),
            password_scheme: PasswordScheme::default(),
            bcrypt_cost: default_bcrypt_cost(),
            admin_username: default_admin_username(),
            admin_email: default_admin_email(),
            admin_password: None,
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    8
}

fn default_lockout_threshold() -> i64 {
    5
}

fn default_lockout_minutes() -> i64 {
    15
}

fn default_bcrypt_cost() -> u32 {
    12
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_email() -> String {
    "admin@localhost".to_string()
}

/// Where rate-limit counters are kept
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Shared `rate_limits` table, consistent across instances
    #[default]
    Database,
    /// Process-local map; only correct for a single instance
    Memory,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RouteLimit {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RouteLimit {
    pub const fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: RateLimitBackend,
    #[serde(default = "default_login_limit")]
    pub login: RouteLimit,
    #[serde(default = "default_mutation_limit")]
    pub mutation: RouteLimit,
    #[serde(default = "default_quote_create_limit")]
    pub quote_create: RouteLimit,
    #[serde(default = "default_public_form_limit")]
    pub public_form: RouteLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: RateLimitBackend::default(),
            login: default_login_limit(),
            mutation: default_mutation_limit(),
            quote_create: default_quote_create_limit(),
            public_form: default_public_form_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_login_limit() -> RouteLimit {
    RouteLimit::new(60, 300)
}

fn default_mutation_limit() -> RouteLimit {
    RouteLimit::new(60, 300)
}

fn default_quote_create_limit() -> RouteLimit {
    RouteLimit::new(30, 300)
}

fn default_public_form_limit() -> RouteLimit {
    RouteLimit::new(10, 300)
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// Inbox that receives quote and contact notifications (defaults to `from_address`)
    pub notify_address: Option<String>,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.as_deref().is_some_and(|h| !h.is_empty())
            && self.from_address.as_deref().is_some_and(|a| !a.is_empty())
    }

    pub fn recipient(&self) -> Option<&str> {
        self.notify_address
            .as_deref()
            .or(self.from_address.as_deref())
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: true,
            from_address: None,
            from_name: default_from_name(),
            notify_address: None,
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Leadgate".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse configuration file")?;
            config.validate()?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    /// Reject combinations that would break running instances
    pub fn validate(&self) -> Result<()> {
        if self.auth.password_scheme == PasswordScheme::Legacy && self.auth.legacy_secret().is_none()
        {
            anyhow::bail!(
                "auth.password_scheme = \"legacy\" requires auth.server_secret to be set"
            );
        }
        Ok(())
    }
}
