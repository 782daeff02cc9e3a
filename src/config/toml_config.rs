use crate::config::env::{decode_value, EnvSource};
use crate::domain::documents::DocumentSpec;
use crate::utils::error::{EtlError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Optional configuration file. Every value here is a fallback for the
/// matching environment variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub pretix: Option<PretixSection>,
    pub filters: Option<FilterSection>,
    pub storage: Option<StorageSection>,
    pub schedule: Option<ScheduleSection>,
    pub excel: Option<ExcelSection>,
    pub stamps: Option<StampSection>,
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub documents: Vec<DocumentSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PretixSection {
    pub url: Option<String>,
    pub organizer_slug: Option<String>,
    pub event_slug: Option<String>,
    pub api_token: Option<String>,
    pub locale: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSection {
    /// Order status code (`n`, `p`, `e`, `c`).
    pub status: Option<String>,
    pub testmode: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub upload_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSection {
    pub run_once: Option<bool>,
    pub interval_minutes: Option<u64>,
    pub check_interval_seconds: Option<u64>,
    pub skip_unchanged: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcelSection {
    pub max_column_width: Option<usize>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StampSection {
    pub last_updated: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: Option<String>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>, E: EnvSource>(path: P, env: &E) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            EtlError::InvalidConfigValueError {
                field: "config".to_string(),
                value: path.as_ref().display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::from_toml_str(&content, env)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str<E: EnvSource>(content: &str, env: &E) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content, env)?;

        let mut config: Self =
            toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
                field: "toml_parsing".to_string(),
                message: format!("TOML parsing error: {}", e),
            })?;
        config.decode_values()?;
        Ok(config)
    }

    /// 替換環境變數 (例如 ${API_KEY})；未設定的保持原樣
    fn substitute_env_vars<E: EnvSource>(content: &str, env: &E) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| EtlError::config("toml_parsing", e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env.get(var_name)
                .unwrap_or_else(|| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Applies the `BASE64:` decoding to every string setting.
    fn decode_values(&mut self) -> Result<()> {
        if let Some(pretix) = &mut self.pretix {
            decode("pretix.url", &mut pretix.url)?;
            decode("pretix.organizer_slug", &mut pretix.organizer_slug)?;
            decode("pretix.event_slug", &mut pretix.event_slug)?;
            decode("pretix.api_token", &mut pretix.api_token)?;
            decode("pretix.locale", &mut pretix.locale)?;
        }
        if let Some(filters) = &mut self.filters {
            decode("filters.status", &mut filters.status)?;
        }
        if let Some(storage) = &mut self.storage {
            decode("storage.url", &mut storage.url)?;
            decode("storage.username", &mut storage.username)?;
            decode("storage.password", &mut storage.password)?;
            decode("storage.upload_dir", &mut storage.upload_dir)?;
        }
        if let Some(excel) = &mut self.excel {
            decode("excel.timezone", &mut excel.timezone)?;
        }
        if let Some(stamps) = &mut self.stamps {
            decode("stamps.last_updated", &mut stamps.last_updated)?;
            decode("stamps.version", &mut stamps.version)?;
        }
        if let Some(logging) = &mut self.logging {
            decode("logging.level", &mut logging.level)?;
        }
        Ok(())
    }
}

fn decode(field: &str, value: &mut Option<String>) -> Result<()> {
    if let Some(raw) = value.as_mut() {
        *raw = decode_value(field, raw.trim())?;
    }
    Ok(())
}
