//! Immutable application configuration, built once at startup.
//!
//! Precedence: environment (or secret file) > TOML file > built-in default.

pub mod env;
pub mod toml_config;

use crate::core::fetcher::FetchFilters;
use crate::core::publisher::StampSettings;
use crate::core::scheduler::ScheduleSettings;
use crate::domain::documents::{default_documents, validate_documents, DocumentSpec};
use crate::domain::model::OrderStatus;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_one_of, validate_positive_number, validate_remote_path,
    validate_url, Validate,
};
use chrono_tz::Tz;
use env::{EnvReader, EnvSource, Secret};
use std::time::Duration;
use toml_config::TomlConfig;

pub const DEFAULT_PRETIX_URL: &str = "https://pretix.eu";
pub const DEFAULT_UPLOAD_DIR: &str = "Registrations";
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
pub const DEFAULT_LOCALE: &str = "de";
const LOG_LEVELS: &[&str] = &["debug", "info", "warning", "error"];

#[derive(Debug, Clone)]
pub struct PretixSettings {
    pub api_url: String,
    pub organizer: String,
    pub event: String,
    pub token: Secret,
    pub locale: String,
    pub filters: FetchFilters,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub url: String,
    pub username: String,
    pub password: Secret,
    pub upload_dir: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pretix: PretixSettings,
    pub storage: StorageSettings,
    pub schedule: ScheduleSettings,
    pub skip_unchanged: bool,
    pub request_timeout: Duration,
    pub max_column_width: usize,
    pub timezone: Tz,
    pub stamps: StampSettings,
    pub logging_level: String,
    pub documents: Vec<DocumentSpec>,
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EtlError::MissingConfigError {
            field: field.to_string(),
        })
}

/// Adds `https://` when no scheme is given and drops trailing slashes.
pub fn normalize_url(field: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    validate_url(field, &url)?;
    if url.starts_with("http://") {
        tracing::warn!("⚠️ {} uses plain http; credentials are sent unencrypted", field);
    }
    Ok(url)
}

impl AppConfig {
    /// Merges and validates both sources.
    pub fn build<E: EnvSource>(env: &E, toml: TomlConfig) -> Result<Self> {
        let config = Self::from_sources(env, toml)?;
        config.validate()?;
        Ok(config)
    }

    /// `LOGGING_LEVEL` alone; read before the logger is installed.
    pub fn logging_level<E: EnvSource>(env: &E, toml: &TomlConfig) -> Result<String> {
        let configured = toml.logging.as_ref().and_then(|l| l.level.clone());
        Ok(EnvReader::new(env)
            .string("LOGGING_LEVEL")?
            .or(configured)
            .unwrap_or_else(|| "info".to_string())
            .to_lowercase())
    }

    pub fn from_sources<E: EnvSource>(env: &E, toml: TomlConfig) -> Result<Self> {
        let logging_level = Self::logging_level(env, &toml)?;
        let reader = EnvReader::new(env);
        let pretix = toml.pretix.unwrap_or_default();
        let filters = toml.filters.unwrap_or_default();
        let storage = toml.storage.unwrap_or_default();
        let schedule = toml.schedule.unwrap_or_default();
        let excel = toml.excel.unwrap_or_default();
        let stamps = toml.stamps.unwrap_or_default();

        let api_url = reader
            .string("PRETIX_URL")?
            .or(pretix.url)
            .unwrap_or_else(|| DEFAULT_PRETIX_URL.to_string());
        let storage_url = required("NEXTCLOUD_URL", reader.string("NEXTCLOUD_URL")?.or(storage.url))?;

        let timezone_name = reader
            .string("TZ")?
            .or(excel.timezone)
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|e| EtlError::InvalidConfigValueError {
                field: "TZ".to_string(),
                value: timezone_name.clone(),
                reason: e.to_string(),
            })?;

        let interval_minutes = reader
            .number::<u64>("INTERVAL_MINUTES")?
            .or(schedule.interval_minutes)
            .unwrap_or(15);
        let run_interval = interval_minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| EtlError::InvalidConfigValueError {
                field: "INTERVAL_MINUTES".to_string(),
                value: interval_minutes.to_string(),
                reason: "interval is too large".to_string(),
            })?;

        let documents = if toml.documents.is_empty() {
            default_documents()
        } else {
            toml.documents
        };

        Ok(Self {
            pretix: PretixSettings {
                api_url: normalize_url("PRETIX_URL", &api_url)?,
                organizer: required(
                    "PRETIX_ORGANIZER_SLUG",
                    reader.string("PRETIX_ORGANIZER_SLUG")?.or(pretix.organizer_slug),
                )?,
                event: required(
                    "PRETIX_EVENT_SLUG",
                    reader.string("PRETIX_EVENT_SLUG")?.or(pretix.event_slug),
                )?,
                token: Secret::new(required(
                    "PRETIX_API_TOKEN",
                    reader.string("PRETIX_API_TOKEN")?.or(pretix.api_token),
                )?),
                locale: reader
                    .string("PRETIX_LOCALE")?
                    .or(pretix.locale)
                    .unwrap_or_else(|| DEFAULT_LOCALE.to_string()),
                filters: FetchFilters {
                    status: filters.status.map(OrderStatus::from),
                    testmode: filters.testmode,
                },
            },
            storage: StorageSettings {
                url: normalize_url("NEXTCLOUD_URL", &storage_url)?,
                username: required(
                    "NEXTCLOUD_USERNAME",
                    reader.string("NEXTCLOUD_USERNAME")?.or(storage.username),
                )?,
                password: Secret::new(required(
                    "NEXTCLOUD_PASSWORD",
                    reader.string("NEXTCLOUD_PASSWORD")?.or(storage.password),
                )?),
                upload_dir: reader
                    .string("NEXTCLOUD_UPLOAD_DIR")?
                    .or(storage.upload_dir)
                    .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            },
            schedule: ScheduleSettings {
                run_once: reader.flag("RUN_ONCE")?.or(schedule.run_once).unwrap_or(false),
                run_interval,
                check_interval: Duration::from_secs(
                    reader
                        .number::<u64>("CHECK_INTERVAL_SECONDS")?
                        .or(schedule.check_interval_seconds)
                        .unwrap_or(60),
                ),
            },
            skip_unchanged: reader
                .flag("SKIP_UNCHANGED")?
                .or(schedule.skip_unchanged)
                .unwrap_or(true),
            request_timeout: Duration::from_secs(
                reader
                    .number::<u64>("REQUEST_TIMEOUT_SECONDS")?
                    .or(pretix.request_timeout_seconds)
                    .unwrap_or(30),
            ),
            max_column_width: reader
                .number::<usize>("EXCEL_MAX_COLUMN_WIDTH")?
                .or(excel.max_column_width)
                .unwrap_or(30),
            timezone,
            stamps: StampSettings {
                last_updated_name: stamps
                    .last_updated
                    .unwrap_or_else(|| StampSettings::default().last_updated_name),
                version_name: stamps
                    .version
                    .unwrap_or_else(|| StampSettings::default().version_name),
                docker_image: reader.string("DOCKER_IMAGE")?,
            },
            logging_level,
            documents,
        })
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("PRETIX_ORGANIZER_SLUG", &self.pretix.organizer)?;
        validate_non_empty_string("PRETIX_EVENT_SLUG", &self.pretix.event)?;
        validate_positive_number(
            "INTERVAL_MINUTES",
            self.schedule.run_interval.as_secs() / 60,
            1,
        )?;
        validate_positive_number(
            "CHECK_INTERVAL_SECONDS",
            self.schedule.check_interval.as_secs(),
            1,
        )?;
        validate_positive_number("REQUEST_TIMEOUT_SECONDS", self.request_timeout.as_secs(), 1)?;
        validate_positive_number("EXCEL_MAX_COLUMN_WIDTH", self.max_column_width as u64, 5)?;
        validate_one_of("LOGGING_LEVEL", &self.logging_level, LOG_LEVELS)?;
        validate_remote_path("NEXTCLOUD_UPLOAD_DIR", &self.storage.upload_dir)?;
        for name in [&self.stamps.last_updated_name, &self.stamps.version_name] {
            if name.contains('/') {
                return Err(EtlError::InvalidConfigValueError {
                    field: "stamps".to_string(),
                    value: name.clone(),
                    reason: "stamp names must be plain file names".to_string(),
                });
            }
            validate_remote_path("stamps", name)?;
        }
        if self.schedule.check_interval > self.schedule.run_interval {
            tracing::warn!(
                "CHECK_INTERVAL_SECONDS ({:?}) is longer than INTERVAL_MINUTES ({:?})",
                self.schedule.check_interval,
                self.schedule.run_interval
            );
        }
        validate_documents(&self.documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<String, String> {
        [
            ("PRETIX_ORGANIZER_SLUG", "demo"),
            ("PRETIX_EVENT_SLUG", "summer"),
            ("PRETIX_API_TOKEN", "token"),
            ("NEXTCLOUD_URL", "cloud.example.org/"),
            ("NEXTCLOUD_USERNAME", "sync"),
            ("NEXTCLOUD_PASSWORD", "BASE64:cGFzc3dvcmQ="),
            ("SECRETS_DIR", "/nonexistent"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::build(&base_env(), TomlConfig::default()).unwrap();
        assert_eq!(config.pretix.api_url, "https://pretix.eu");
        assert_eq!(config.storage.url, "https://cloud.example.org");
        assert_eq!(config.storage.password.expose(), "password");
        assert_eq!(config.storage.upload_dir, "Registrations");
        assert_eq!(config.schedule.run_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.schedule.check_interval, Duration::from_secs(60));
        assert!(!config.schedule.run_once);
        assert!(config.skip_unchanged);
        assert_eq!(config.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(config.max_column_width, 30);
        assert_eq!(config.logging_level, "info");
        assert_eq!(config.documents, default_documents());
    }

    #[test]
    fn test_missing_required_value() {
        let mut env = base_env();
        env.remove("PRETIX_EVENT_SLUG");
        let err = AppConfig::build(&env, TomlConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            EtlError::MissingConfigError { ref field } if field == "PRETIX_EVENT_SLUG"
        ));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (name, value) in [
            ("INTERVAL_MINUTES", "0"),
            ("CHECK_INTERVAL_SECONDS", "0"),
            ("EXCEL_MAX_COLUMN_WIDTH", "4"),
            ("LOGGING_LEVEL", "verbose"),
            ("TZ", "Mars/Olympus"),
            ("RUN_ONCE", "maybe"),
            ("NEXTCLOUD_UPLOAD_DIR", "../escape"),
        ] {
            let mut env = base_env();
            env.insert(name.to_string(), value.to_string());
            let err = AppConfig::build(&env, TomlConfig::default()).unwrap_err();
            assert!(err.is_config_error(), "{} = {} accepted", name, value);
        }
    }

    #[test]
    fn test_environment_overrides_toml() {
        let toml = TomlConfig::from_toml_str(
            r#"
[pretix]
url = "https://tickets.example.org"
event_slug = "from-file"

[schedule]
interval_minutes = 30
"#,
            &HashMap::<String, String>::new(),
        )
        .unwrap();
        let mut env = base_env();
        env.insert("INTERVAL_MINUTES".to_string(), "5".to_string());

        let config = AppConfig::from_sources(&env, toml).unwrap();
        assert_eq!(config.pretix.api_url, "https://tickets.example.org");
        assert_eq!(config.pretix.event, "summer");
        assert_eq!(config.schedule.run_interval, Duration::from_secs(5 * 60));
    }

    #[test]
    fn test_huge_interval_is_config_error() {
        let mut env = base_env();
        env.insert("INTERVAL_MINUTES".to_string(), u64::MAX.to_string());
        let err = AppConfig::build(&env, TomlConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            EtlError::InvalidConfigValueError { ref field, .. } if field == "INTERVAL_MINUTES"
        ));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_toml_fallbacks_are_decoded() {
        let toml = TomlConfig::from_toml_str(
            r#"
[pretix]
api_token = "BASE64:dG9rZW4="

[storage]
password = "BASE64:cGFzc3dvcmQ="

[logging]
level = "DEBUG"
"#,
            &HashMap::<String, String>::new(),
        )
        .unwrap();
        let mut env = base_env();
        env.remove("PRETIX_API_TOKEN");
        env.remove("NEXTCLOUD_PASSWORD");

        assert_eq!(AppConfig::logging_level(&env, &toml).unwrap(), "debug");
        let config = AppConfig::build(&env, toml).unwrap();
        assert_eq!(config.pretix.token.expose(), "token");
        assert_eq!(config.storage.password.expose(), "password");
        assert_eq!(config.logging_level, "debug");
    }

    #[test]
    fn test_config_file_is_read_with_substitution() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("regsync.toml");
        std::fs::write(&path, "[storage]\nupload_dir = \"${EVENT_DIR}\"\n").unwrap();
        let mut env = base_env();
        env.insert("EVENT_DIR".to_string(), "Events/Summer".to_string());

        let toml = TomlConfig::from_file(&path, &env).unwrap();
        let config = AppConfig::build(&env, toml).unwrap();
        assert_eq!(config.storage.upload_dir, "Events/Summer");

        let missing = dir.path().join("missing.toml");
        assert!(TomlConfig::from_file(&missing, &env).unwrap_err().is_config_error());
    }

    #[test]
    fn test_debug_output_hides_credentials() {
        let config = AppConfig::build(&base_env(), TomlConfig::default()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("password\""));
        assert!(!rendered.contains("\"token\""));
    }
}
