use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Not validated here; the first upstream call fails without it.
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub chat_model: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub realtime_calls_url: String,
    pub schema_path: PathBuf,
    pub strict_schema: bool,
    pub data_path: PathBuf,
    pub transcript_path: PathBuf,
    pub client_page_path: PathBuf,
    pub require_complete_save: bool,
    pub session_ttl: Duration,
    pub upstream_timeout: Duration,
    pub upstream_retry_backoff: Duration,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var_or(name, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:3000")?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base: var_or("OPENAI_API_BASE", "https://api.openai.com/v1"),
            chat_model: var_or("CHAT_MODEL", "gpt-4o"),
            realtime_model: var_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2024-12-17"),
            realtime_voice: var_or("REALTIME_VOICE", "alloy"),
            realtime_calls_url: var_or(
                "REALTIME_CALLS_URL",
                "https://api.openai.com/v1/realtime/calls",
            ),
            schema_path: PathBuf::from(var_or("SCHEMA_PATH", "schema.json")),
            strict_schema: parse_var("STRICT_SCHEMA", "false")?,
            data_path: PathBuf::from(var_or("DATA_PATH", "collected_data.json")),
            transcript_path: PathBuf::from(var_or(
                "TRANSCRIPT_PATH",
                "conversation_transcript.json",
            )),
            client_page_path: PathBuf::from(var_or("CLIENT_PAGE_PATH", "static/index.html")),
            require_complete_save: parse_var("REQUIRE_COMPLETE_SAVE", "false")?,
            session_ttl: Duration::from_secs(parse_var("SESSION_TTL_SECS", "3600")?),
            upstream_timeout: Duration::from_secs(parse_var("UPSTREAM_TIMEOUT_SECS", "30")?),
            upstream_retry_backoff: Duration::from_millis(parse_var(
                "UPSTREAM_RETRY_BACKOFF_MS",
                "500",
            )?),
            log_level,
        })
    }
}
