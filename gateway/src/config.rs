use anyhow::{Context, Result};
use std::env;

/// Environment-driven gateway configuration (§6), in the style of the
/// teacher's `GatewayConfig::from_env()`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_keys: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub rate_limit_window_secs: u64,
    pub idempotency_ttl_secs: u64,
    pub host: String,
    pub port: u16,
    pub environment: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let api_keys = env::var("API_KEYS")
            .context("API_KEYS must be set (comma-separated allowlist)")?
            .split(',')
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect::<Vec<_>>();
        if api_keys.is_empty() {
            anyhow::bail!("API_KEYS must contain at least one key");
        }

        let rate_limit_per_minute = env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(60);
        let rate_limit_window_secs = env::var("RATE_LIMIT_WINDOW_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        let idempotency_ttl_secs = env::var("IDEMPOTENCY_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(3600);
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT").ok().and_then(|v| v.parse::<u16>().ok()).unwrap_or(8080);
        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Ok(Self {
            api_keys,
            rate_limit_per_minute,
            rate_limit_window_secs: rate_limit_window_secs.max(1),
            idempotency_ttl_secs: idempotency_ttl_secs.max(1),
            host,
            port,
            environment,
        })
    }
}
