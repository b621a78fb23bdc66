use std::env;
use std::time::Duration;

/// Process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub google_endpoint: String,
    pub google_api_key: String,
    pub provider_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            google_endpoint: env::var("GOOGLE_ROUTES_ENDPOINT")
                .unwrap_or_else(|_| google_routes::DEFAULT_ENDPOINT.to_string()),
            google_api_key: env::var("GOOGLE_API_KEY").unwrap_or_default(),
            provider_timeout: Duration::from_secs(env_u64("PROVIDER_TIMEOUT_SECS", 10)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|value| value.parse::<u64>().ok()).unwrap_or(default)
}
