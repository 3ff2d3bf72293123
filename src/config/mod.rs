pub mod profiles;

use anyhow::Context;
use dotenvy::dotenv;
use profiles::{Profile, ProfileDefaults};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{bank::DEFAULT_INSTRUCTIONS, BankAccount};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Memory,
    Postgres,
}

impl LedgerBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(anyhow::anyhow!("unknown ledger backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!("unknown log format: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayAConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct GatewayBConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct BankTransferConfig {
    pub accounts: Vec<BankAccount>,
    pub instructions: String,
}

/// Bounded client-facing status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl PollPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff up to the cap.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(2000),
            max_backoff: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub interval: Duration,
    pub batch_size: i64,
    pub min_age: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub ledger_backend: LedgerBackend,
    pub admin_api_token: Option<String>,
    pub auth_user_header: String,
    pub public_base_url: String,
    pub gateway_a: Option<GatewayAConfig>,
    pub gateway_b: Option<GatewayBConfig>,
    pub bank_transfer: Option<BankTransferConfig>,
    pub status_poll: PollPolicy,
    pub reconcile: ReconcileSettings,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
}

pub struct ConfigInfo {
    pub config: Config,
    pub profile: Profile,
    pub overrides: Vec<String>,
}

/// Reads keys through `lookup` and records which ones were explicitly set.
struct Source<F> {
    lookup: F,
    overrides: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn get(&mut self, key: &str) -> Option<String> {
        let value = (self.lookup)(key).filter(|v| !v.trim().is_empty());
        if value.is_some() {
            self.overrides.push(key.to_string());
        }
        value
    }

    fn parse<T>(&mut self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
            None => Ok(default),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<ConfigInfo> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<ConfigInfo>
    where
        F: Fn(&str) -> Option<String>,
    {
        let profile = Profile::parse(lookup("APP_PROFILE").as_deref());
        let defaults = ProfileDefaults::for_profile(profile);
        let mut src = Source {
            lookup,
            overrides: Vec::new(),
        };

        let server_port = src.parse("SERVER_PORT", defaults.server_port)?;
        let database_url = src.get("DATABASE_URL");
        let ledger_backend = src.parse("LEDGER_BACKEND", defaults.ledger_backend)?;
        if ledger_backend == LedgerBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when LEDGER_BACKEND=postgres");
        }

        let admin_api_token = src.get("ADMIN_API_TOKEN");
        let auth_user_header = src
            .get("AUTH_USER_HEADER")
            .unwrap_or_else(|| "x-user-id".to_string())
            .to_lowercase();
        let public_base_url = src
            .get("PUBLIC_BASE_URL")
            .unwrap_or(defaults.public_base_url);
        url::Url::parse(&public_base_url).context("PUBLIC_BASE_URL is not a valid URL")?;

        let gateway_a = match (
            src.get("GATEWAY_A_BASE_URL"),
            src.get("GATEWAY_A_API_KEY"),
            src.get("GATEWAY_A_WEBHOOK_SECRET"),
        ) {
            (None, None, None) => None,
            (Some(base_url), Some(api_key), Some(webhook_secret)) => Some(GatewayAConfig {
                base_url,
                api_key,
                webhook_secret,
            }),
            _ => anyhow::bail!(
                "GATEWAY_A_BASE_URL, GATEWAY_A_API_KEY and GATEWAY_A_WEBHOOK_SECRET must be set together"
            ),
        };

        let gateway_b = match (
            src.get("GATEWAY_B_BASE_URL"),
            src.get("GATEWAY_B_API_KEY"),
            src.get("GATEWAY_B_SECRET_KEY"),
        ) {
            (None, None, None) => None,
            (Some(base_url), Some(api_key), Some(secret_key)) => Some(GatewayBConfig {
                base_url,
                api_key,
                secret_key,
            }),
            _ => anyhow::bail!(
                "GATEWAY_B_BASE_URL, GATEWAY_B_API_KEY and GATEWAY_B_SECRET_KEY must be set together"
            ),
        };

        let bank_transfer_enabled: bool = src.parse("BANK_TRANSFER_ENABLED", true)?;
        let bank_accounts = match src.get("BANK_ACCOUNTS") {
            Some(raw) => serde_json::from_str::<Vec<BankAccount>>(&raw)
                .context("BANK_ACCOUNTS must be a JSON array of bank accounts")?,
            None => BankAccount::defaults(),
        };
        let instructions = src
            .get("BANK_TRANSFER_INSTRUCTIONS")
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());
        let bank_transfer = bank_transfer_enabled.then_some(BankTransferConfig {
            accounts: bank_accounts,
            instructions,
        });

        let poll_defaults = PollPolicy::default();
        let max_attempts: u32 = src.parse("STATUS_POLL_ATTEMPTS", poll_defaults.max_attempts)?;
        if max_attempts == 0 {
            anyhow::bail!("STATUS_POLL_ATTEMPTS must be at least 1");
        }
        let status_poll = PollPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(src.parse("STATUS_POLL_BACKOFF_MS", 2000)?),
            max_backoff: Duration::from_millis(src.parse("STATUS_POLL_MAX_BACKOFF_MS", 10_000)?),
        };

        let reconcile = ReconcileSettings {
            interval: Duration::from_secs(
                src.parse("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval_secs)?,
            ),
            batch_size: src.parse("RECONCILE_BATCH_SIZE", 50)?,
            min_age: Duration::from_secs(src.parse("RECONCILE_MIN_AGE_SECS", 60)?),
        };

        let cors_allowed_origins = src
            .get("CORS_ALLOWED_ORIGINS")
            .or(defaults.cors_allowed_origins);
        let log_format = src.parse("LOG_FORMAT", defaults.log_format)?;

        Ok(ConfigInfo {
            config: Config {
                server_port,
                database_url,
                ledger_backend,
                admin_api_token,
                auth_user_header,
                public_base_url,
                gateway_a,
                gateway_b,
                bank_transfer,
                status_poll,
                reconcile,
                cors_allowed_origins,
                log_format,
            },
            profile,
            overrides: src.overrides,
        })
    }
}
