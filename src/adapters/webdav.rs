//! Nextcloud-compatible WebDAV storage.
//!
//! Files live under `{server}/remote.php/dav/files/{username}/`. Directories
//! are created with `MKCOL`, files written with `PUT` and replaced with
//! `MOVE` + `Overwrite: T`.

use crate::domain::ports::Storage;
use crate::utils::error::{EtlError, Result};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct WebDavStorage {
    client: Client,
    root: Url,
    username: String,
    password: String,
}

impl WebDavStorage {
    pub fn new(server_url: &str, username: &str, password: &str, timeout: Duration) -> Result<Self> {
        let mut root = Url::parse(server_url).map_err(|e| EtlError::InvalidConfigValueError {
            field: "NEXTCLOUD_URL".to_string(),
            value: server_url.to_string(),
            reason: e.to_string(),
        })?;
        root.path_segments_mut()
            .map_err(|_| EtlError::config("NEXTCLOUD_URL", "URL cannot be used as a base"))?
            .pop_if_empty()
            .extend(["remote.php", "dav", "files", username]);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::config("NEXTCLOUD_URL", e.to_string()))?;

        Ok(Self {
            client,
            root,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Absolute URL of a store-relative path, percent-encoding each segment.
    pub fn url_for(&self, path: &str) -> Result<Url> {
        let mut url = self.root.clone();
        url.path_segments_mut()
            .map_err(|_| EtlError::config("NEXTCLOUD_URL", "URL cannot be used as a base"))?
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn mkcol(&self, path: &str) -> Result<StatusCode> {
        let method = Method::from_bytes(b"MKCOL").map_err(|e| EtlError::UploadError {
            path: path.to_string(),
            status: None,
            retryable: false,
            message: e.to_string(),
        })?;
        let response = self
            .request(method, self.url_for(path)?)
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;
        Ok(response.status())
    }

    async fn mkcol_existing_ok(&self, path: &str) -> Result<()> {
        match self.mkcol(path).await? {
            StatusCode::CREATED => {
                tracing::debug!("Created remote directory {}", path);
                Ok(())
            }
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => Err(classify_upload(path, status, "MKCOL failed")),
        }
    }
}

/// 401/403 and other 4xx are final; 429 and 5xx may succeed next run.
pub fn classify_upload(path: &str, status: StatusCode, context: &str) -> EtlError {
    let code = status.as_u16();
    let message = match code {
        401 | 403 => format!("{}: authentication rejected ({})", context, status),
        429 => format!("{}: rate limited", context),
        500..=599 => format!("{}: server error ({})", context, status),
        _ => format!("{}: invalid path or request ({})", context, status),
    };
    EtlError::UploadError {
        path: path.to_string(),
        status: Some(code),
        retryable: code == 429 || status.is_server_error(),
        message,
    }
}

fn transport_error(path: &str, err: reqwest::Error) -> EtlError {
    EtlError::UploadError {
        path: path.to_string(),
        status: None,
        retryable: true,
        message: if err.is_timeout() {
            format!("request timed out: {}", err)
        } else {
            err.to_string()
        },
    }
}

impl Storage for WebDavStorage {
    async fn create_dir_all(&self, path: &str) -> Result<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Ok(());
        }

        match self.mkcol(path).await? {
            StatusCode::CREATED | StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            StatusCode::CONFLICT => {
                // 父目錄不存在，逐層建立
                tracing::debug!("Parent of {} missing, creating segment by segment", path);
                for depth in 1..=segments.len() {
                    self.mkcol_existing_ok(&segments[..depth].join("/")).await?;
                }
                Ok(())
            }
            status => Err(classify_upload(path, status, "MKCOL failed")),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let response = self
            .request(Method::PUT, self.url_for(path)?)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| transport_error(path, e))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            status => Err(classify_upload(path, status, "PUT failed")),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let method = Method::from_bytes(b"MOVE").map_err(|e| EtlError::UploadError {
            path: to.to_string(),
            status: None,
            retryable: false,
            message: e.to_string(),
        })?;
        let destination = self.url_for(to)?;
        let response = self
            .request(method, self.url_for(from)?)
            .header("Destination", destination.as_str())
            .header("Overwrite", "T")
            .send()
            .await
            .map_err(|e| transport_error(to, e))?;

        match response.status() {
            StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            status => Err(classify_upload(to, status, "MOVE failed")),
        }
    }
}
