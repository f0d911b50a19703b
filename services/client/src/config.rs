//! services/client/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::{warn, Level};
use url::Url;

/// Used when `BACKEND_URL` is unset. Deployments must set the variable explicitly.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000/api/v1";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub backend_url: Url,
    pub supabase_url: Url,
    pub supabase_anon_key: String,
    pub request_timeout: Duration,
    pub callback_bind_address: SocketAddr,
    pub site_origin: Url,
    pub refetch_debounce: Duration,
    pub log_level: Level,
    pub study_email: Option<String>,
    pub study_password: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Backend Endpoints ---
        let backend_url = match lookup("BACKEND_URL") {
            Some(raw) => parse_url("BACKEND_URL", &raw)?,
            None => {
                warn!(
                    default = DEFAULT_BACKEND_URL,
                    "BACKEND_URL is not set; falling back to the built-in default"
                );
                parse_url("BACKEND_URL", DEFAULT_BACKEND_URL)?
            }
        };

        let supabase_url = lookup("SUPABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("SUPABASE_URL".to_string()))
            .and_then(|raw| parse_url("SUPABASE_URL", &raw))?;

        let supabase_anon_key = lookup("SUPABASE_ANON_KEY")
            .ok_or_else(|| ConfigError::MissingVar("SUPABASE_ANON_KEY".to_string()))?;

        // --- Timing ---
        let request_timeout =
            Duration::from_secs(parse_number(&lookup, "REQUEST_TIMEOUT_SECS", 30)?);
        let refetch_debounce =
            Duration::from_millis(parse_number(&lookup, "REFETCH_DEBOUNCE_MS", 250)?);

        // --- Callback Server ---
        let bind_address_str = lookup("CALLBACK_BIND_ADDRESS")
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let callback_bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("CALLBACK_BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let site_origin_str =
            lookup("SITE_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());
        let site_origin = parse_url("SITE_ORIGIN", &site_origin_str)?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- CLI Credentials (optional) ---
        let study_email = lookup("STUDY_EMAIL");
        let study_password = lookup("STUDY_PASSWORD");

        Ok(Self {
            backend_url,
            supabase_url,
            supabase_anon_key,
            request_timeout,
            callback_bind_address,
            site_origin,
            refetch_debounce,
            log_level,
            study_email,
            study_password,
        })
    }
}

fn parse_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}

fn parse_number<F>(lookup: &F, var: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("SUPABASE_URL", "https://project.supabase.co"),
        ("SUPABASE_ANON_KEY", "anon"),
    ];

    #[test]
    fn defaults_apply_when_optional_vars_are_missing() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.backend_url.as_str(), DEFAULT_BACKEND_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.refetch_debounce, Duration::from_millis(250));
        assert_eq!(config.callback_bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.study_email.is_none());
    }

    #[test]
    fn backend_url_is_read_from_the_environment() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("BACKEND_URL", "https://api.example.com/v1"));
        vars.push(("REQUEST_TIMEOUT_SECS", "5"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.backend_url.as_str(), "https://api.example.com/v1");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_supabase_url_is_an_error() {
        let result = Config::from_lookup(lookup(&[("SUPABASE_ANON_KEY", "anon")]));
        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "SUPABASE_URL"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("REQUEST_TIMEOUT_SECS", "soon"));
        let result = Config::from_lookup(lookup(&vars));
        assert!(matches!(result, Err(ConfigError::InvalidValue(var, _)) if var == "REQUEST_TIMEOUT_SECS"));
    }
}
