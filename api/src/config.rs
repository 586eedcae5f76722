use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use deskgate_core::validate::is_identifier;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLocation {
    Local(PathBuf),
    Remote(Url),
}

impl SpecLocation {
    pub fn describe(&self) -> String {
        match self {
            SpecLocation::Local(path) => path.display().to_string(),
            SpecLocation::Remote(url) => url.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub upstream_url: Url,
    pub upstream_account_id: String,
    pub upstream_token: String,
    pub upstream_timeout: Duration,
    /// Bearer gating tool and policy calls. Unset is only accepted in development.
    pub internal_token: Option<String>,
    pub rate_limit_per_minute: u32,
    pub messages_rate_limit_per_minute: u32,
    pub spec: SpecLocation,
    pub spec_cache_ttl_secs: u64,
    pub tool_timeout: Duration,
    pub sweep_interval: Duration,
    pub cors_origins: Vec<String>,
    pub block_automation_agents: bool,
    pub database_url: Option<String>,
}

impl Config {
    /// Read configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("DESKGATE_ENV") {
            None => Environment::Development,
            Some(raw) => Environment::parse(&raw).ok_or_else(|| ConfigError::Invalid {
                name: "DESKGATE_ENV",
                value: raw,
                reason: "expected development, production or test".to_string(),
            })?,
        };

        let bind_addr = parse_or(&get, "DESKGATE_BIND_ADDR", "0.0.0.0:3000".parse().ok())?;

        let upstream_url = http_url(
            "DESKGATE_UPSTREAM_URL",
            get("DESKGATE_UPSTREAM_URL").ok_or(ConfigError::Missing("DESKGATE_UPSTREAM_URL"))?,
        )?;
        let upstream_account_id = get("DESKGATE_UPSTREAM_ACCOUNT_ID")
            .ok_or(ConfigError::Missing("DESKGATE_UPSTREAM_ACCOUNT_ID"))?;
        if !is_identifier(&upstream_account_id) {
            return Err(ConfigError::Invalid {
                name: "DESKGATE_UPSTREAM_ACCOUNT_ID",
                value: upstream_account_id,
                reason: "must be alphanumeric with - or _".to_string(),
            });
        }
        let upstream_token =
            get("DESKGATE_UPSTREAM_TOKEN").ok_or(ConfigError::Missing("DESKGATE_UPSTREAM_TOKEN"))?;

        let internal_token = get("DESKGATE_INTERNAL_TOKEN");
        if internal_token.is_none() && environment != Environment::Development {
            return Err(ConfigError::Missing("DESKGATE_INTERNAL_TOKEN"));
        }

        let spec_local: bool = parse_or(&get, "DESKGATE_SPEC_LOCAL", Some(true))?;
        let spec = if spec_local {
            SpecLocation::Local(PathBuf::from(
                get("DESKGATE_SPEC_PATH").unwrap_or_else(|| "./policy".to_string()),
            ))
        } else {
            SpecLocation::Remote(http_url(
                "DESKGATE_SPEC_URL",
                get("DESKGATE_SPEC_URL").ok_or(ConfigError::Missing("DESKGATE_SPEC_URL"))?,
            )?)
        };

        let cors_origins = get("DESKGATE_CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            bind_addr,
            environment,
            upstream_url,
            upstream_account_id,
            upstream_token,
            upstream_timeout: Duration::from_secs(positive(&get, "DESKGATE_UPSTREAM_TIMEOUT_SECS", 30)?),
            internal_token,
            rate_limit_per_minute: parse_or(&get, "DESKGATE_RATE_LIMIT_PER_MINUTE", Some(60))?,
            messages_rate_limit_per_minute: parse_or(
                &get,
                "DESKGATE_MESSAGES_RATE_LIMIT_PER_MINUTE",
                Some(30),
            )?,
            spec,
            spec_cache_ttl_secs: positive(&get, "DESKGATE_SPEC_CACHE_TTL_SECS", 300)?,
            tool_timeout: Duration::from_secs(positive(&get, "DESKGATE_TOOL_TIMEOUT_SECS", 15)?),
            sweep_interval: Duration::from_secs(positive(&get, "DESKGATE_SWEEP_INTERVAL_SECS", 60)?),
            cors_origins,
            block_automation_agents: parse_or(&get, "DESKGATE_BLOCK_AUTOMATION_AGENTS", Some(false))?,
            database_url: get("DATABASE_URL"),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: err.to_string(),
        }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

fn positive<G>(get: &G, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(get, name, Some(default))?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn http_url(name: &'static str, raw: String) -> Result<Url, ConfigError> {
    let url = Url::parse(&raw).map_err(|err| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "must be an http(s) URL".to_string(),
        });
    }
    Ok(url)
}
