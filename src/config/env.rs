//! Environment variables and Docker-style secret files.
//!
//! Every variable `NAME` may instead be given as `NAME_SECRET_NAME`, naming a
//! file in the secrets directory (`/run/secrets`, or `SECRETS_DIR`). Values
//! from either place may be obfuscated with a `BASE64:` prefix.

use crate::utils::error::{EtlError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";
const BASE64_PREFIX: &str = "BASE64:";

pub trait EnvSource {
    fn get(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Strips and decodes a `BASE64:` prefix; other values pass through.
pub fn decode_value(field: &str, raw: &str) -> Result<String> {
    let Some(encoded) = raw.strip_prefix(BASE64_PREFIX) else {
        return Ok(raw.to_string());
    };
    let invalid = |reason: String| EtlError::InvalidConfigValueError {
        field: field.to_string(),
        value: format!("{}…", BASE64_PREFIX),
        reason,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| invalid(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("decoded value is not UTF-8: {}", e)))
}

pub struct EnvReader<'a, E: EnvSource> {
    env: &'a E,
    secrets_dir: PathBuf,
}

impl<'a, E: EnvSource> EnvReader<'a, E> {
    pub fn new(env: &'a E) -> Self {
        let secrets_dir = env
            .get("SECRETS_DIR")
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SECRETS_DIR.to_string());
        Self {
            env,
            secrets_dir: PathBuf::from(secrets_dir),
        }
    }

    /// Decoded value of `name`, from the environment or its secret file.
    pub fn string(&self, name: &str) -> Result<Option<String>> {
        if let Some(value) = self.env.get(name).filter(|v| !v.trim().is_empty()) {
            return decode_value(name, value.trim()).map(Some);
        }

        let secret_var = format!("{}_SECRET_NAME", name);
        let Some(secret_name) = self.env.get(&secret_var).filter(|v| !v.trim().is_empty()) else {
            return Ok(None);
        };
        let secret_name = secret_name.trim();
        if secret_name.contains(&['/', '\\'][..]) || secret_name == ".." {
            return Err(EtlError::InvalidConfigValueError {
                field: secret_var,
                value: secret_name.to_string(),
                reason: "secret name must be a plain file name".to_string(),
            });
        }

        let path = self.secrets_dir.join(secret_name);
        let content =
            std::fs::read_to_string(&path).map_err(|e| EtlError::InvalidConfigValueError {
                field: secret_var.clone(),
                value: secret_name.to_string(),
                reason: format!("cannot read {}: {}", path.display(), e),
            })?;
        tracing::debug!("Read {} from secret file {}", name, path.display());
        decode_value(name, content.trim()).map(Some)
    }

    pub fn flag(&self, name: &str) -> Result<Option<bool>> {
        let Some(value) = self.string(name)? else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(EtlError::InvalidConfigValueError {
                field: name.to_string(),
                value,
                reason: "expected true or false".to_string(),
            }),
        }
    }

    pub fn number<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.string(name)? else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|e| EtlError::InvalidConfigValueError {
                field: name.to_string(),
                value,
                reason: e.to_string(),
            })
    }
}
