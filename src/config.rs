use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::time::Duration;

use crate::task_log::DEFAULT_LOG_CAPACITY;

pub const DEFAULT_API_URL: &str = "https://proxy.opinion.trade:8443/api/bsc/api";

#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub api_url: String,
    pub wallet_address: Option<String>,
    pub multisig_address: Option<String>,
    pub private_key: Option<String>,
    pub auth_token: Option<String>,

    // Mode
    pub dry_run: bool,
    pub log_level: String,

    // Server & storage
    pub bind_addr: String,
    pub db_path: String,

    // Engine
    pub request_timeout_secs: u64,
    pub task_log_capacity: usize,
    pub max_credential_failures: u32,
    pub fill_verify_attempts: u32,
    pub fill_verify_delay_ms: u64,
    pub price_tick: Decimal,

    // Alerts
    pub discord_webhook: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            api_url: env::var("OPINION_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            wallet_address: non_empty("WALLET_ADDRESS"),
            multisig_address: non_empty("MULTISIG_ADDRESS"),
            private_key: non_empty("PRIVATE_KEY"),
            auth_token: non_empty("AUTH_TOKEN"),

            dry_run: env::var("DRY_RUN")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string()),
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "./data/trades.db".to_string()),

            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid REQUEST_TIMEOUT_SECS")?,
            task_log_capacity: env::var("TASK_LOG_CAPACITY")
                .unwrap_or_else(|_| DEFAULT_LOG_CAPACITY.to_string())
                .parse()
                .context("Invalid TASK_LOG_CAPACITY")?,
            max_credential_failures: env::var("MAX_CREDENTIAL_FAILURES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid MAX_CREDENTIAL_FAILURES")?,
            fill_verify_attempts: env::var("FILL_VERIFY_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid FILL_VERIFY_ATTEMPTS")?,
            fill_verify_delay_ms: env::var("FILL_VERIFY_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .context("Invalid FILL_VERIFY_DELAY_MS")?,
            price_tick: env::var("PRICE_TICK")
                .unwrap_or_else(|_| "0.001".to_string())
                .parse()
                .context("Invalid PRICE_TICK")?,

            discord_webhook: non_empty("DISCORD_WEBHOOK"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.price_tick <= Decimal::ZERO || self.price_tick >= Decimal::ONE {
            bail!("PRICE_TICK must be between 0 and 1, got {}", self.price_tick);
        }
        if self.request_timeout_secs == 0 {
            bail!("REQUEST_TIMEOUT_SECS must be positive");
        }
        if !self.dry_run {
            if self.private_key.is_none() {
                bail!("PRIVATE_KEY not set (required unless DRY_RUN=true)");
            }
            if self.wallet_address.is_none() {
                bail!("WALLET_ADDRESS not set (required unless DRY_RUN=true)");
            }
        }
        Ok(())
    }

    /// Knobs consumed by the registry and strategy workers
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            log_capacity: self.task_log_capacity,
            max_credential_failures: self.max_credential_failures.max(1),
            fill_verify_attempts: self.fill_verify_attempts.max(1),
            fill_verify_delay: Duration::from_millis(self.fill_verify_delay_ms),
            tick: self.price_tick,
            status_interval: Duration::from_secs(300),
            dry_run: self.dry_run,
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound for any single exchange call
    pub request_timeout: Duration,
    pub log_capacity: usize,
    /// Consecutive credential failures before a task errors out
    pub max_credential_failures: u32,
    pub fill_verify_attempts: u32,
    pub fill_verify_delay: Duration,
    pub tick: Decimal,
    /// Cadence of the market maker status summary
    pub status_interval: Duration,
    pub dry_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            log_capacity: DEFAULT_LOG_CAPACITY,
            max_credential_failures: 3,
            fill_verify_attempts: 3,
            fill_verify_delay: Duration::from_secs(2),
            tick: dec!(0.001),
            status_interval: Duration::from_secs(300),
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            wallet_address: None,
            multisig_address: None,
            private_key: None,
            auth_token: None,
            dry_run: true,
            log_level: "info".to_string(),
            bind_addr: "127.0.0.1:8000".to_string(),
            db_path: "./data/trades.db".to_string(),
            request_timeout_secs: 30,
            task_log_capacity: 5000,
            max_credential_failures: 0,
            fill_verify_attempts: 3,
            fill_verify_delay_ms: 2000,
            price_tick: dec!(0.001),
            discord_webhook: None,
        }
    }

    #[test]
    fn test_dry_run_needs_no_wallet() {
        assert!(sample().validate().is_ok());

        let live = Config {
            dry_run: false,
            ..sample()
        };
        assert!(live.validate().is_err());
    }

    #[test]
    fn test_invalid_tick_rejected() {
        let config = Config {
            price_tick: dec!(1.5),
            ..sample()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_settings_floor() {
        let settings = sample().engine_settings();
        assert_eq!(settings.max_credential_failures, 1);
        assert_eq!(settings.fill_verify_delay, Duration::from_millis(2000));
        assert_eq!(settings.tick, dec!(0.001));
    }
}
