pub mod database;

use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    /// Days a freshly signed consent stays valid; 0 disables auto-expiry.
    pub consent_validity_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,

            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,

            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid PORT value: {}", e))?,

            consent_validity_days: env::var("CONSENT_VALIDITY_DAYS")
                .unwrap_or_else(|_| "365".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid CONSENT_VALIDITY_DAYS value: {}", e))?,
        })
    }
}
