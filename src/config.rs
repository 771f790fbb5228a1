use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub frontend_url: Option<String>,
    pub esewa: EsewaConfig,
}

/// Merchant settings for the eSewa redirect flow. Defaults point at the public sandbox.
#[derive(Debug, Clone)]
pub struct EsewaConfig {
    pub gateway_url: String,
    pub merchant_code: String,
    pub secret_key: String,
    pub success_url: String,
    pub failure_url: String,
}

impl Default for EsewaConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://rc-epay.esewa.com.np/api/epay/main/v2/form".to_string(),
            merchant_code: "EPAYTEST".to_string(),
            secret_key: "8gBm/:&EnhH.1/q".to_string(),
            success_url: "http://localhost:5173/payment/success".to_string(),
            failure_url: "http://localhost:5173/payment/failure".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 10);
        let db_acquire_timeout_secs = parse_or("DB_ACQUIRE_TIMEOUT_SECS", 5);
        let jwt_ttl_hours = parse_or("JWT_TTL_HOURS", 24);
        let frontend_url = env::var("FRONTEND_URL").ok().filter(|v| !v.is_empty());

        let defaults = EsewaConfig::default();
        let esewa = EsewaConfig {
            gateway_url: env::var("ESEWA_GATEWAY_URL").unwrap_or(defaults.gateway_url),
            merchant_code: env::var("ESEWA_MERCHANT_CODE").unwrap_or(defaults.merchant_code),
            secret_key: env::var("ESEWA_SECRET_KEY").unwrap_or(defaults.secret_key),
            success_url: env::var("ESEWA_SUCCESS_URL").unwrap_or(defaults.success_url),
            failure_url: env::var("ESEWA_FAILURE_URL").unwrap_or(defaults.failure_url),
        };

        Ok(Self {
            database_url,
            host,
            port,
            db_max_connections,
            db_acquire_timeout_secs,
            jwt_secret,
            jwt_ttl_hours,
            frontend_url,
            esewa,
        })
    }

    /// Configuration for tests and tooling that never touch the environment.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            host: "127.0.0.1".to_string(),
            port: 0,
            db_max_connections: 5,
            db_acquire_timeout_secs: 5,
            jwt_secret: "test-secret".to_string(),
            jwt_ttl_hours: 1,
            frontend_url: None,
            esewa: EsewaConfig::default(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
