//! Layered configuration.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`EDUVISION_*`, `__` separates sections)
//! 2. `eduvision.toml` in the working directory
//! 3. Built-in defaults
//!
//! `EDUVISION_ATTENDANCE__DEFAULT_GEO_FENCE_RADIUS_M=150` maps to
//! `attendance.default_geo_fence_radius_m`.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LOCAL_CONFIG_FILE: &str = "eduvision.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationConfig {
    /// Empty accepts any domain.
    #[serde(default)]
    pub allowed_email_domain: String,

    /// Recorded as the reviewer when a review omits `reviewedBy`.
    #[serde(default = "default_reviewer_email")]
    pub reviewer_email: String,
}

fn default_reviewer_email() -> String {
    "admin@sanjivani.edu.in".to_string()
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            allowed_email_domain: String::new(),
            reviewer_email: default_reviewer_email(),
        }
    }
}

impl RegistrationConfig {
    pub fn email_domain(&self) -> Option<&str> {
        let d = self.allowed_email_domain.trim().trim_start_matches('@');
        (!d.is_empty()).then_some(d)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    #[serde(default = "default_temporary_password_len")]
    pub temporary_password_len: usize,
}

const fn default_session_ttl_hours() -> i64 {
    24
}

const fn default_temporary_password_len() -> usize {
    12
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            temporary_password_len: default_temporary_password_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttendanceConfig {
    #[serde(default = "default_geo_fence_radius_m")]
    pub default_geo_fence_radius_m: f64,
}

const fn default_geo_fence_radius_m() -> f64 {
    100.0
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            default_geo_fence_radius_m: default_geo_fence_radius_m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

const fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Loads `.env` (best effort) and then every configured source.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            figment = figment.merge(Toml::file(local));
        }
        // Bare `EDUVISION_LOG` is the tracing filter, not the `[log]` table.
        figment.merge(Env::prefixed("EDUVISION_").ignore(&["log"]).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.session_ttl_hours <= 0 {
            return Err(invalid("auth.session_ttl_hours", "must be positive"));
        }
        if !(8..=64).contains(&self.auth.temporary_password_len) {
            return Err(invalid(
                "auth.temporary_password_len",
                "must be between 8 and 64",
            ));
        }
        let radius = self.attendance.default_geo_fence_radius_m;
        if !(radius.is_finite() && radius > 0.0) {
            return Err(invalid(
                "attendance.default_geo_fence_radius_m",
                "must be a positive number of metres",
            ));
        }
        if self.storage.max_upload_bytes == 0 {
            return Err(invalid("storage.max_upload_bytes", "must be positive"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_figment(Figment::from(Serialized::defaults(Config::default())))
            .expect("defaults");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.auth.session_ttl_hours, 24);
        assert_eq!(config.attendance.default_geo_fence_radius_m, 100.0);
        assert_eq!(config.registration.email_domain(), None);
    }

    #[test]
    fn env_overrides_nested_sections() {
        Jail::expect_with(|jail| {
            jail.set_env("EDUVISION_ATTENDANCE__DEFAULT_GEO_FENCE_RADIUS_M", "150");
            jail.set_env("EDUVISION_REGISTRATION__ALLOWED_EMAIL_DOMAIN", "@sanjivani.edu.in");
            let config = Config::from_figment(Config::figment()).expect("config");
            assert_eq!(config.attendance.default_geo_fence_radius_m, 150.0);
            assert_eq!(config.registration.email_domain(), Some("sanjivani.edu.in"));
            Ok(())
        });
    }

    #[test]
    fn tracing_filter_variable_is_not_config() {
        Jail::expect_with(|jail| {
            jail.set_env("EDUVISION_LOG", "eduvisiond=trace");
            jail.set_env("EDUVISION_LOG__LEVEL", "warn");
            let config = Config::from_figment(Config::figment()).expect("config");
            assert_eq!(config.log.level, "warn");
            Ok(())
        });
    }

    #[test]
    fn toml_file_is_layered_under_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "eduvision.toml",
                r#"
                [auth]
                session_ttl_hours = 2

                [log]
                level = "debug"
                "#,
            )?;
            jail.set_env("EDUVISION_AUTH__SESSION_TTL_HOURS", "6");
            let config = Config::from_figment(Config::figment()).expect("config");
            assert_eq!(config.auth.session_ttl_hours, 6);
            assert_eq!(config.log.level, "debug");
            Ok(())
        });
    }

    #[test]
    fn rejects_non_positive_radius() {
        Jail::expect_with(|jail| {
            jail.set_env("EDUVISION_ATTENDANCE__DEFAULT_GEO_FENCE_RADIUS_M", "0");
            let result = Config::from_figment(Config::figment());
            assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
            Ok(())
        });
    }
}
