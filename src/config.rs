use std::env;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    /// Base URL of the web client, used for links in emails
    pub app_base_url: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub invitation_ttl_days: i64,
    pub otp_ttl_minutes: i64,
    pub google_client_id: Option<String>,
    pub mail_webhook_url: Option<String>,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Config(format!("{} must be set", key)))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            server_host: optional("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: parse_or(&lookup, "SERVER_PORT", 50051)?,
            app_base_url: optional("APP_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            access_token_ttl_minutes: parse_or(&lookup, "ACCESS_TOKEN_TTL_MINUTES", 60)?,
            refresh_token_ttl_days: parse_or(&lookup, "REFRESH_TOKEN_TTL_DAYS", 30)?,
            invitation_ttl_days: parse_or(&lookup, "INVITATION_TTL_DAYS", 7)?,
            otp_ttl_minutes: parse_or(&lookup, "OTP_TTL_MINUTES", 10)?,
            google_client_id: optional("GOOGLE_CLIENT_ID"),
            mail_webhook_url: optional("MAIL_WEBHOOK_URL"),
            run_migrations: parse_or(&lookup, "RUN_MIGRATIONS", true)?,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
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

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/tenantry"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.server_addr(), "0.0.0.0:50051");
        assert_eq!(config.invitation_ttl_days, 7);
        assert_eq!(config.access_token_ttl_minutes, 60);
        assert_eq!(config.app_base_url, "http://localhost:3000");
        assert!(config.google_client_id.is_none());
        assert!(config.run_migrations);
    }

    #[test]
    fn test_missing_secret() {
        let result = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/x")]));
        assert!(matches!(result, Err(AppError::Config(msg)) if msg.contains("JWT_SECRET")));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/tenantry"),
            ("JWT_SECRET", "secret"),
            ("SERVER_PORT", "8080"),
            ("APP_BASE_URL", "https://app.example.com/"),
            ("INVITATION_TTL_DAYS", "3"),
            ("RUN_MIGRATIONS", "false"),
            ("GOOGLE_CLIENT_ID", "client-id"),
        ]))
        .unwrap();

        assert_eq!(config.server_port, 8080);
        assert_eq!(config.app_base_url, "https://app.example.com");
        assert_eq!(config.invitation_ttl_days, 3);
        assert!(!config.run_migrations);
        assert_eq!(config.google_client_id.as_deref(), Some("client-id"));
    }

    #[test]
    fn test_invalid_port() {
        let result = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/tenantry"),
            ("JWT_SECRET", "secret"),
            ("SERVER_PORT", "not-a-port"),
        ]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
