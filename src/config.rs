use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_PRIMARY_BASE_URL: &str = "https://api.semrush.com/reports/v1/projects";
const DEFAULT_FALLBACK_BASE_URL: &str = "https://api.semrush.com";
const DEFAULT_DIAGNOSTICS_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 14;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub provider: ProviderSettings,
    pub overall_timeout_secs: u64,
    pub cache_ttl_days: i64,
    pub database_file_name: String,
    pub diagnostics_enabled: bool,
    pub diagnostics_max_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub api_key: Option<SecretString>,
    pub primary_base_url: String,
    pub fallback_base_url: String,
    pub database: String,
    pub display_limit: u32,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub primary_base_url: String,
    pub fallback_base_url: String,
    pub database: String,
    pub display_limit: u32,
    pub request_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    pub cache_ttl_days: i64,
    pub database_file_name: String,
    pub diagnostics_enabled: bool,
    pub has_api_key: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            provider: ProviderSettings {
                api_key: env::var("RANK_API_KEY")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| SecretString::new(v.into())),
                primary_base_url: env::var("RANK_PRIMARY_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_PRIMARY_BASE_URL.to_string()),
                fallback_base_url: env::var("RANK_FALLBACK_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_FALLBACK_BASE_URL.to_string()),
                database: env::var("RANK_DATABASE").unwrap_or_else(|_| "us".to_string()),
                display_limit: parse_u32("RANK_DISPLAY_LIMIT", 100).max(1),
                request_timeout_secs: parse_u64("RANK_REQUEST_TIMEOUT_SECS", 15).max(1),
            },
            overall_timeout_secs: parse_u64("RANK_OVERALL_TIMEOUT_SECS", 45).max(1),
            cache_ttl_days: parse_i64("RANK_CACHE_TTL_DAYS", DEFAULT_CACHE_TTL_DAYS).max(0),
            database_file_name: env::var("DATABASE_FILE_NAME")
                .unwrap_or_else(|_| "keyword-rankings.db".to_string()),
            diagnostics_enabled: parse_bool("DIAGNOSTICS_ENABLED", true),
            diagnostics_max_bytes: parse_u64(
                "DIAGNOSTICS_MAX_BYTES",
                DEFAULT_DIAGNOSTICS_MAX_BYTES,
            ),
        }
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            primary_base_url: self.provider.primary_base_url.clone(),
            fallback_base_url: self.provider.fallback_base_url.clone(),
            database: self.provider.database.clone(),
            display_limit: self.provider.display_limit,
            request_timeout_secs: self.provider.request_timeout_secs,
            overall_timeout_secs: self.overall_timeout_secs,
            cache_ttl_days: self.cache_ttl_days,
            database_file_name: self.database_file_name.clone(),
            diagnostics_enabled: self.diagnostics_enabled,
            has_api_key: self.provider.api_key.is_some(),
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[cfg(test)]
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            api_key: Some(SecretString::new("test-key".into())),
            primary_base_url: format!("{}/projects", base_url.trim_end_matches('/')),
            fallback_base_url: base_url.trim_end_matches('/').to_string(),
            database: "us".into(),
            display_limit: 100,
            request_timeout_secs: 15,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_public_profile_without_secrets() {
        env::set_var("RANK_API_KEY", "secret");
        env::set_var("DATABASE_FILE_NAME", "custom.db");
        env::set_var("RANK_CACHE_TTL_DAYS", "7");
        env::set_var("DIAGNOSTICS_ENABLED", "false");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.database_file_name, "custom.db");
        assert_eq!(public.cache_ttl_days, 7);
        assert!(!public.diagnostics_enabled);
        assert!(public.has_api_key);
        assert!(config.provider.api_key.is_some());
        assert_eq!(public.request_timeout_secs, 15);
        assert_eq!(config.overall_timeout(), Duration::from_secs(45));

        let serialized = serde_json::to_string(&public).unwrap();
        assert!(!serialized.contains("secret"));
    }
}
