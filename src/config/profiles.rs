use super::{LedgerBackend, LogFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Staging,
    Production,
}

impl Profile {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("APP_PROFILE").ok().as_deref())
    }

    pub fn parse(value: Option<&str>) -> Self {
        value
            .and_then(|s| match s.to_lowercase().as_str() {
                "development" | "dev" => Some(Self::Development),
                "staging" | "stage" => Some(Self::Staging),
                "production" | "prod" => Some(Self::Production),
                _ => None,
            })
            .unwrap_or(Self::Development)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileDefaults {
    pub server_port: u16,
    pub ledger_backend: LedgerBackend,
    pub public_base_url: String,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
    pub reconcile_interval_secs: u64,
}

impl ProfileDefaults {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Development => Self {
                server_port: 3000,
                ledger_backend: LedgerBackend::Memory,
                public_base_url: "http://localhost:3000".to_string(),
                cors_allowed_origins: None,
                log_format: LogFormat::Text,
                reconcile_interval_secs: 30,
            },
            Profile::Staging => Self {
                server_port: 8080,
                ledger_backend: LedgerBackend::Postgres,
                public_base_url: "https://staging.example.com".to_string(),
                cors_allowed_origins: Some("https://staging.example.com".to_string()),
                log_format: LogFormat::Json,
                reconcile_interval_secs: 30,
            },
            Profile::Production => Self {
                server_port: 8080,
                ledger_backend: LedgerBackend::Postgres,
                public_base_url: "https://app.example.com".to_string(),
                cors_allowed_origins: Some("https://app.example.com".to_string()),
                log_format: LogFormat::Json,
                reconcile_interval_secs: 60,
            },
        }
    }
}
