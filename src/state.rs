use anyhow::{Context, Result};
use std::{str::FromStr, sync::Arc, time::Duration};

use crate::{conversation::ConversationService, websocket::ChatHub};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversation_service: ConversationService,
    pub hub: ChatHub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("unknown APP_ENV value: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub message_rate_limit: u32,
    pub message_rate_window: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            jwt_secret,
            database_url,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            host: lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_or(&lookup, "PORT", 3000)?,
            environment: parse_or(&lookup, "APP_ENV", Environment::Production)?,
            message_rate_limit: parse_or(&lookup, "MESSAGE_RATE_LIMIT", 30)?,
            message_rate_window: Duration::from_secs(parse_or(
                &lookup,
                "MESSAGE_RATE_WINDOW_SECS",
                60,
            )?),
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} must be valid: {}", key, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(&[("JWT_SECRET", "secret")])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.message_rate_limit, 30);
        assert_eq!(config.message_rate_window, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        assert!(Config::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("JWT_SECRET", "secret"),
            ("APP_ENV", "development"),
            ("PORT", "8080"),
            ("MESSAGE_RATE_LIMIT", "5"),
        ]))
        .unwrap();
        assert!(config.is_development());
        assert_eq!(config.port, 8080);
        assert_eq!(config.message_rate_limit, 5);

        let bad = Config::from_lookup(lookup_from(&[("JWT_SECRET", "s"), ("PORT", "eighty")]));
        assert!(bad.is_err());
    }
}
