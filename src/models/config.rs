//! Configuration models for ps360.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! Every field has a default, so the service can run from environment
//! variables alone when no config file is mounted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for ps360.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// PowerScribe RAS connection settings
    #[serde(default)]
    pub powerscribe: PowerscribeConfig,

    /// Poll loop timing and paging
    #[serde(default)]
    pub polling: PollingConfig,

    /// Target database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Health endpoint
    #[serde(default)]
    pub health: HealthConfig,

    /// Cursor/registry checkpoint
    #[serde(default)]
    pub state: StateConfig,
}

/// PowerScribe RAS connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerscribeConfig {
    /// RAS host (host[:port]); falls back to `host_env`
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_host_env")]
    pub host_env: String,

    /// URL scheme for the RAS services
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Login name; falls back to `username_env`
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Password; falls back to `password_env`
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Client version reported at sign-in
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_locale")]
    pub locale: String,

    /// Windows time zone id reported at sign-in
    #[serde(default = "default_time_zone_id")]
    pub time_zone_id: String,

    /// Workstation name reported at sign-in
    #[serde(default)]
    pub workstation: String,

    /// Site searched by BrowseOrders (0 = all sites)
    #[serde(default)]
    pub site_id: i64,

    /// Service contract namespace used to build SOAP actions
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Emit WS-Addressing headers (Action/MessageID/To)
    #[serde(default = "default_true")]
    pub addressing: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_host_env() -> String {
    "PS360_HOST".to_string()
}

fn default_username_env() -> String {
    "PS360_USER".to_string()
}

fn default_password_env() -> String {
    "PS360_PASSWORD".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_version() -> String {
    "7.0.212.0".to_string()
}

fn default_locale() -> String {
    "en-NZ".to_string()
}

fn default_time_zone_id() -> String {
    "New Zealand Standard Time".to_string()
}

fn default_namespace() -> String {
    "http://tempuri.org/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Default for PowerscribeConfig {
    fn default() -> Self {
        Self {
            host: None,
            host_env: default_host_env(),
            scheme: default_scheme(),
            username: None,
            username_env: default_username_env(),
            password: None,
            password_env: default_password_env(),
            version: default_version(),
            locale: default_locale(),
            time_zone_id: default_time_zone_id(),
            workstation: String::new(),
            site_id: 0,
            namespace: default_namespace(),
            addressing: true,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between passes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Initial browse window reaching back from startup
    #[serde(default = "default_lookback")]
    pub lookback_minutes: i64,

    /// Sign out and back in after this many hours
    #[serde(default = "default_session_hours")]
    pub session_hours: u64,

    /// Wait after a failed session before signing in again
    #[serde(default = "default_interval")]
    pub retry_delay_secs: u64,

    /// Rows per BrowseOrders page
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on pages fetched per pass
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Concurrent GetReportEvents calls
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_interval() -> u64 {
    60
}

fn default_lookback() -> i64 {
    240
}

/// One year; RAS sessions are recycled long before this.
const MAX_SESSION_HOURS: u64 = 24 * 365;

fn default_session_hours() -> u64 {
    24
}

fn default_page_size() -> u32 {
    500
}

fn default_max_pages() -> u32 {
    10
}

fn default_concurrency() -> usize {
    4
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            lookback_minutes: default_lookback(),
            session_hours: default_session_hours(),
            retry_delay_secs: default_interval(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_hours.saturating_mul(60 * 60))
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; falls back to `url_env`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_database_env")]
    pub url_env: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_env() -> String {
    "AUTOTRIAGE_CONN".to_string()
}

fn default_max_connections() -> u32 {
    2
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_env: default_database_env(),
            max_connections: default_max_connections(),
        }
    }
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,

    /// Report unhealthy when no pass has succeeded for this long
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_stale_after() -> u64 {
    300
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            stale_after_secs: default_stale_after(),
        }
    }
}

/// Checkpoint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Checkpoint file; no checkpointing when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Resolved sign-in credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content, path)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn from_toml(content: &str, path: &std::path::Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the RAS host from config or environment.
    pub fn resolve_host(&self) -> Result<String, ConfigError> {
        resolve_value("host", &self.powerscribe.host, &self.powerscribe.host_env)
    }

    /// Resolve sign-in credentials from config or environment.
    ///
    /// B_i(credentials available) → Result
    pub fn resolve_credentials(&self) -> Result<Credentials, ConfigError> {
        Ok(Credentials {
            username: resolve_value(
                "username",
                &self.powerscribe.username,
                &self.powerscribe.username_env,
            )?,
            password: resolve_value(
                "password",
                &self.powerscribe.password,
                &self.powerscribe.password_env,
            )?,
        })
    }

    /// Resolve the database URL, if one is configured anywhere.
    pub fn resolve_database_url(&self) -> Option<String> {
        if let Some(url) = &self.database.url {
            return Some(expand_env_vars(url));
        }
        std::env::var(&self.database.url_env).ok()
    }

    /// Check values that would otherwise only fail at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_host()?;
        self.resolve_credentials()?;

        if self.polling.interval_secs == 0 {
            return Err(ConfigError::Invalid("polling.interval_secs must be > 0".into()));
        }
        if self.polling.page_size == 0 || self.polling.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "polling.page_size and polling.max_pages must be > 0".into(),
            ));
        }
        if self.polling.session_hours == 0 || self.polling.session_hours > MAX_SESSION_HOURS {
            return Err(ConfigError::Invalid(format!(
                "polling.session_hours must be between 1 and {MAX_SESSION_HOURS}"
            )));
        }
        if self.polling.concurrency == 0 {
            return Err(ConfigError::Invalid("polling.concurrency must be > 0".into()));
        }
        if self.powerscribe.max_retries == 0 {
            return Err(ConfigError::Invalid("powerscribe.max_retries must be > 0".into()));
        }
        if self.health.enabled && self.health.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "health.bind is not a socket address: {}",
                self.health.bind
            )));
        }
        Ok(())
    }
}

fn resolve_value(
    field: &'static str,
    explicit: &Option<String>,
    env_var: &str,
) -> Result<String, ConfigError> {
    if let Some(value) = explicit {
        return Ok(expand_env_vars(value));
    }

    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing {
            field,
            env_var: env_var.to_string(),
        }),
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing {field}: set {env_var} env var or {field} in config")]
    Missing {
        field: &'static str,
        env_var: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
