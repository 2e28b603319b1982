//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Reddit credentials.
    pub reddit: RedditConfig,
    /// Propagation behavior.
    pub bot: BotConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Poll cadence.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Gateway worker pool.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Reddit script-app credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Bot account username.
    pub username: String,
    /// Bot account password.
    pub password: String,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Requests allowed per rate-limit window.
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    /// Rate-limit window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Propagation behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Token whose presence in a private ban note triggers propagation.
    #[serde(default = "default_keyword")]
    pub keyword: String,
    /// Note attached to every ban this bot applies.
    #[serde(default = "default_system_note")]
    pub system_note: String,
    /// Community hosting the registry page.
    pub main_list_community: String,
    /// Page id of the registry on the main-list community.
    #[serde(default = "default_registry_page")]
    pub registry_page: String,
    /// The main-list community only hosts the list and is never a ban target.
    #[serde(default)]
    pub main_list_only: bool,
    /// Reconcile every active record against every community each cycle.
    #[serde(default)]
    pub full_sweep: bool,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Poll cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a single cycle and exit.
    #[serde(default)]
    pub run_once: bool,
}

/// Gateway worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrent gateway calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Timeout for a single gateway call in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Transient failures tolerated before a target is treated as permanent.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_once: false,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_user_agent() -> String {
    format!("ada-rs/{}", env!("CARGO_PKG_VERSION"))
}

const fn default_requests_per_window() -> u32 {
    60
}

const fn default_window_secs() -> u64 {
    60
}

fn default_keyword() -> String {
    "ADA".to_string()
}

fn default_system_note() -> String {
    "Banned from ADA main list.".to_string()
}

fn default_registry_page() -> String {
    "ada_config".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_interval_secs() -> u64 {
    300
}

const fn default_concurrency() -> usize {
    4
}

const fn default_call_timeout_secs() -> u64 {
    30
}

const fn default_max_attempts() -> u32 {
    10
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `ADA_ENV`)
    /// 4. Environment variables with `ADA_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let env = std::env::var("ADA_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("ADA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ADA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Parse configuration from an in-memory TOML document.
    pub fn from_toml(text: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
