use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub tracking: TrackingConfig,
    pub realtime: RealtimeConfig,
    pub client_ip: ClientIpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Secret mixed into every identity hash so ids cannot be recomputed offline
    pub app_secret: String,
    pub remove_trailing_slash: bool,
    pub ingest_timeout_ms: u64,
    pub ignore_bots: bool,
    pub goal_cache_capacity: u64,
    pub goal_cache_ttl_secs: u64,
    /// Path to a MaxMind GeoLite2-City / GeoIP2-City database
    pub geoip_city_db: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub hub_queue_capacity: usize,
    pub client_buffer: usize,
    pub heartbeat_interval_secs: u64,
    pub listener_keepalive_secs: u64,
    pub listener_backoff_min_ms: u64,
    pub listener_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// CIDR ranges of proxies allowed to set forwarding headers
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    pub num_trusted_proxies: Option<usize>,
    pub anonymize_ip: bool,
}

impl TrackingConfig {
    pub fn ingest_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_timeout_ms)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            app_secret: String::new(),
            remove_trailing_slash: true,
            ingest_timeout_ms: 5_000,
            ignore_bots: true,
            goal_cache_capacity: 10_000,
            goal_cache_ttl_secs: 300,
            geoip_city_db: None,
        }
    }
}

impl RealtimeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn listener_keepalive(&self) -> Duration {
        Duration::from_secs(self.listener_keepalive_secs)
    }

    /// Zero periods and capacities would panic the timers and channels built
    /// from them
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("HUB_QUEUE_CAPACITY", self.hub_queue_capacity as u64),
            ("CLIENT_BUFFER", self.client_buffer as u64),
            ("HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval_secs),
            ("LISTENER_KEEPALIVE_SECS", self.listener_keepalive_secs),
        ];

        for (key, value) in positive {
            if value == 0 {
                anyhow::bail!("{key} must be greater than zero");
            }
        }

        Ok(())
    }

    pub fn listener_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.listener_backoff_min_ms),
            Duration::from_millis(self.listener_backoff_max_ms),
        )
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            hub_queue_capacity: 1024,
            client_buffer: 64,
            heartbeat_interval_secs: 30,
            listener_keepalive_secs: 30,
            listener_backoff_min_ms: 500,
            listener_backoff_max_ms: 30_000,
        }
    }
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
            anonymize_ip: false,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = env_or("DATABASE_URL", "sqlite://./pulse.db?mode=rwc");
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port = env_parse("API_PORT", 8080u16)?;

        let tracking_defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            app_secret: env_or("APP_SECRET", ""),
            remove_trailing_slash: env_flag(
                "REMOVE_TRAILING_SLASH",
                tracking_defaults.remove_trailing_slash,
            ),
            ingest_timeout_ms: env_parse("INGEST_TIMEOUT_MS", tracking_defaults.ingest_timeout_ms)?,
            ignore_bots: env_flag("IGNORE_BOTS", tracking_defaults.ignore_bots),
            goal_cache_capacity: env_parse(
                "GOAL_CACHE_CAPACITY",
                tracking_defaults.goal_cache_capacity,
            )?,
            goal_cache_ttl_secs: env_parse(
                "GOAL_CACHE_TTL_SECS",
                tracking_defaults.goal_cache_ttl_secs,
            )?,
            geoip_city_db: std::env::var("GEOIP_CITY_DB").ok(),
        };

        if tracking.app_secret.is_empty() {
            tracing::warn!("APP_SECRET is not set; session ids are derivable from IP and User-Agent alone");
        }

        let realtime_defaults = RealtimeConfig::default();
        let realtime = RealtimeConfig {
            hub_queue_capacity: env_parse(
                "HUB_QUEUE_CAPACITY",
                realtime_defaults.hub_queue_capacity,
            )?,
            client_buffer: env_parse("CLIENT_BUFFER", realtime_defaults.client_buffer)?,
            heartbeat_interval_secs: env_parse(
                "HEARTBEAT_INTERVAL_SECS",
                realtime_defaults.heartbeat_interval_secs,
            )?,
            listener_keepalive_secs: env_parse(
                "LISTENER_KEEPALIVE_SECS",
                realtime_defaults.listener_keepalive_secs,
            )?,
            listener_backoff_min_ms: env_parse(
                "LISTENER_BACKOFF_MIN_MS",
                realtime_defaults.listener_backoff_min_ms,
            )?,
            listener_backoff_max_ms: env_parse(
                "LISTENER_BACKOFF_MAX_MS",
                realtime_defaults.listener_backoff_max_ms,
            )?,
        };
        realtime
            .validate()
            .context("Invalid realtime configuration")?;

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "none").to_lowercase().as_str() {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            tracking,
            realtime,
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
                anonymize_ip: env_flag("ANONYMIZE_IP", false),
            },
        })
    }
}
