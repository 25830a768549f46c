use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_CURRENCY: &str = "GBP";
pub const DEFAULT_PROCESSOR_BASE_URL: &str = "https://api.stripe.com";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub api_key: Option<String>,
    pub processor_secret_key: Option<String>,
    pub processor_base_url: String,
    pub default_reader_id: Option<String>,
    pub default_currency: String,
    pub webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub log_request_body: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let default_currency = get("DEFAULT_CURRENCY")
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
            .to_uppercase();

        let poll_max_attempts: u32 = get("POLL_MAX_ATTEMPTS")
            .unwrap_or_else(|| "6".to_string())
            .parse()?;
        if poll_max_attempts == 0 {
            anyhow::bail!("POLL_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Config {
            server_port: get("PORT").unwrap_or_else(|| "10000".to_string()).parse()?,
            api_key: get("API_KEY"),
            processor_secret_key: get("STRIPE_SECRET_KEY"),
            processor_base_url: get("STRIPE_API_BASE")
                .unwrap_or_else(|| DEFAULT_PROCESSOR_BASE_URL.to_string()),
            default_reader_id: get("READER_ID"),
            default_currency,
            webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            webhook_tolerance_secs: get("WEBHOOK_TOLERANCE_SECS")
                .unwrap_or_else(|| "300".to_string())
                .parse()?,
            poll_interval_secs: get("POLL_INTERVAL_SECS")
                .unwrap_or_else(|| "5".to_string())
                .parse()?,
            poll_max_attempts,
            cors_allowed_origins: get("CORS_ALLOWED_ORIGINS").map(|raw| parse_origins(&raw)),
            log_request_body: get("LOG_REQUEST_BODY")
                .map(|v| v.parse::<bool>())
                .transpose()?
                .unwrap_or(false),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Caller-supplied reader wins; otherwise the configured default applies.
    pub fn resolve_reader_id(&self, requested: Option<&str>) -> Option<String> {
        requested
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_reader_id.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_port: 10000,
            api_key: None,
            processor_secret_key: None,
            processor_base_url: DEFAULT_PROCESSOR_BASE_URL.to_string(),
            default_reader_id: None,
            default_currency: DEFAULT_CURRENCY.to_string(),
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            poll_interval_secs: 5,
            poll_max_attempts: 6,
            cors_allowed_origins: None,
            log_request_body: false,
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
