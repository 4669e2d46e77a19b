//! Environment-driven configuration.
//!
//! Every environment variable recognized by the controller is read here,
//! once, at startup. Nothing downstream reads `std::env` directly.

use std::env;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).ok().filter(|s| !s.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map(|v| v == "true" || v == "1").unwrap_or(default)
}

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Redis password, if the instance requires auth.
    pub password: Option<String>,
    /// Redis logical database index.
    pub db: i64,
}

impl RedisConfig {
    /// Build a `redis://` connection URL from the discrete fields.
    #[must_use]
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(pw) => format!("redis://:{pw}@{}:{}/{}", self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: env_string("REDIS_HOST", "127.0.0.1"),
            port: env_parse("REDIS_PORT", 6379),
            password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
            db: env_parse("REDIS_DB", 0),
        }
    }
}

/// Tunnel process configuration.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Tunnel protocol (default `http2`, avoids QUIC by default).
    pub protocol: String,
    /// How long to wait for the tunnel to report a public URL.
    pub startup_timeout_ms: u64,
    /// Tunnel name/label, if the provider needs one.
    pub name: Option<String>,
    /// Path to tunnel credentials file.
    pub credentials_path: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            protocol: env_string("TUNNEL_PROTOCOL", "http2"),
            startup_timeout_ms: env_parse("TUNNEL_STARTUP_TIMEOUT_MS", 30_000),
            name: env::var("TUNNEL_NAME").ok().filter(|s| !s.is_empty()),
            credentials_path: env::var("TUNNEL_CREDENTIALS_PATH").ok().filter(|s| !s.is_empty()),
        }
    }
}

/// Readiness / tunnel-verification probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Container health probe timeout.
    pub container_health_timeout_ms: u64,
    /// Number of tunnel-URL verification attempts.
    pub preview_url_attempts: u32,
    /// Delay between tunnel-URL verification attempts.
    pub preview_url_delay_ms: u64,
    /// Per-request timeout for tunnel-URL verification.
    pub preview_url_request_timeout_ms: u64,
    /// Number of service-readiness probe attempts.
    pub service_ready_attempts: u32,
    /// Delay between service-readiness probe attempts.
    pub service_ready_delay_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            container_health_timeout_ms: env_parse("CONTAINER_HEALTH_TIMEOUT_MS", 5_000),
            preview_url_attempts: env_parse("PREVIEW_URL_ATTEMPTS", 6),
            preview_url_delay_ms: env_parse("PREVIEW_URL_DELAY_MS", 2_000),
            preview_url_request_timeout_ms: env_parse("PREVIEW_URL_REQUEST_TIMEOUT_MS", 8_000),
            service_ready_attempts: env_parse("SERVICE_READY_ATTEMPTS", 15),
            service_ready_delay_ms: env_parse("SERVICE_READY_DELAY_MS", 2_000),
        }
    }
}

/// Fixed engineering constants pinned to specific values rather than
/// exposed as environment variables.
#[derive(Debug, Clone)]
pub struct FixedLimits {
    /// Free-port allocation range, inclusive.
    pub port_range: (u16, u16),
    /// Container port the preview app listens on inside the container.
    pub container_port: u16,
    /// Maximum port-probe concurrency.
    pub port_probe_concurrency: usize,
    /// Maximum port-probe attempts before giving up.
    pub port_probe_max_attempts: u32,
    /// Clone timeout.
    pub clone_timeout_secs: u64,
    /// Image build timeout.
    pub build_timeout_secs: u64,
    /// Container run (start) timeout.
    pub run_timeout_secs: u64,
    /// Graceful container stop timeout.
    pub stop_timeout_secs: u64,
    /// Forced container remove timeout.
    pub force_remove_timeout_secs: u64,
    /// Deployment record TTL.
    pub deployment_ttl_secs: i64,
    /// Sweeper scan interval.
    pub sweeper_interval_secs: u64,
    /// Sweeper staleness threshold.
    pub sweeper_stale_after_secs: i64,
    /// Maximum job attempts before dead-letter.
    pub max_job_attempts: u32,
    /// Initial retry backoff.
    pub backoff_initial_secs: u64,
    /// Retry backoff multiplier.
    pub backoff_multiplier: f64,
    /// Retry backoff cap.
    pub backoff_cap_secs: u64,
    /// Stall-detection window (no progress heartbeat within this window).
    pub job_stall_after_secs: u64,
    /// Completed-job history retained by the queue.
    pub retained_completed: usize,
    /// Failed-job history retained by the queue.
    pub retained_failed: usize,
}

impl Default for FixedLimits {
    fn default() -> Self {
        Self {
            port_range: (5001, 5999),
            container_port: 3000,
            port_probe_concurrency: 50,
            port_probe_max_attempts: 200,
            clone_timeout_secs: 300,
            build_timeout_secs: 600,
            run_timeout_secs: 60,
            stop_timeout_secs: 30,
            force_remove_timeout_secs: 15,
            deployment_ttl_secs: 7 * 24 * 3600,
            sweeper_interval_secs: 6 * 3600,
            sweeper_stale_after_secs: 24 * 3600,
            max_job_attempts: 3,
            backoff_initial_secs: 2,
            backoff_multiplier: 2.0,
            backoff_cap_secs: 60,
            job_stall_after_secs: 120,
            retained_completed: 50,
            retained_failed: 100,
        }
    }
}

/// Top-level controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// `tracing` log level filter.
    pub log_level: String,
    /// Whether to trust `X-Forwarded-For` from the proxy in front of us.
    pub trust_proxy: bool,
    /// Allowed CORS origin.
    pub cors_origin: String,
    /// Max requests per window for the rate limiter.
    pub rate_limit_max: u32,
    /// Webhook HMAC signing secret. Required for the service to start.
    pub webhook_secret: Option<String>,
    /// Redis connection settings.
    pub redis: RedisConfig,
    /// Worker pool concurrency.
    pub job_concurrency: usize,
    /// Tunnel process configuration.
    pub tunnel: TunnelConfig,
    /// Probe configuration.
    pub probes: ProbeConfig,
    /// Code-forge app id, for authenticating comment posting.
    pub forge_app_id: Option<String>,
    /// Code-forge private key (inline PEM).
    pub forge_private_key: Option<String>,
    /// Code-forge private key (path to PEM file).
    pub forge_private_key_path: Option<String>,
    /// Fixed engineering limits not driven by the environment.
    pub limits: FixedLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: env_parse("PORT", 3000),
            log_level: env_string("LOG_LEVEL", "info"),
            trust_proxy: env_bool("TRUST_PROXY", false),
            cors_origin: env_string("CORS_ORIGIN", "*"),
            rate_limit_max: env_parse("RATE_LIMIT_MAX", 100),
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            redis: RedisConfig::default(),
            job_concurrency: env_parse("JOB_CONCURRENCY", 3),
            tunnel: TunnelConfig::default(),
            probes: ProbeConfig::default(),
            forge_app_id: env::var("FORGE_APP_ID").ok(),
            forge_private_key: env::var("FORGE_PRIVATE_KEY").ok(),
            forge_private_key_path: env::var("FORGE_PRIVATE_KEY_PATH").ok(),
            limits: FixedLimits::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that mutate process-wide env vars.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_matches_documented_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        env::remove_var("PORT");
        env::remove_var("WEBHOOK_SECRET");
        env::remove_var("JOB_CONCURRENCY");

        let config = Config::default();
        assert_eq!(config.port, 3000);
        assert!(config.webhook_secret.is_none());
        assert_eq!(config.job_concurrency, 3);
        assert_eq!(config.limits.port_range, (5001, 5999));
        assert_eq!(config.limits.max_job_attempts, 3);
    }

    #[test]
    fn config_reads_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        env::set_var("PORT", "9090");
        env::set_var("WEBHOOK_SECRET", "shh");
        env::set_var("JOB_CONCURRENCY", "7");

        let config = Config::default();
        assert_eq!(config.port, 9090);
        assert_eq!(config.webhook_secret, Some("shh".to_string()));
        assert_eq!(config.job_concurrency, 7);

        env::remove_var("PORT");
        env::remove_var("WEBHOOK_SECRET");
        env::remove_var("JOB_CONCURRENCY");
    }

    #[test]
    fn redis_connection_url_without_password() {
        let _lock = ENV_MUTEX.lock().unwrap();
        env::remove_var("REDIS_PASSWORD");
        env::set_var("REDIS_HOST", "cache.local");
        env::set_var("REDIS_PORT", "6380");
        env::set_var("REDIS_DB", "2");

        let redis = RedisConfig::default();
        assert_eq!(redis.connection_url(), "redis://cache.local:6380/2");

        env::remove_var("REDIS_HOST");
        env::remove_var("REDIS_PORT");
        env::remove_var("REDIS_DB");
    }

    #[test]
    fn redis_connection_url_with_password() {
        let _lock = ENV_MUTEX.lock().unwrap();
        env::set_var("REDIS_PASSWORD", "topsecret");
        let redis = RedisConfig::default();
        assert_eq!(redis.connection_url(), "redis://:topsecret@127.0.0.1:6379/0");
        env::remove_var("REDIS_PASSWORD");
    }
}
