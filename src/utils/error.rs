use thiserror::Error;

/// Pipeline stage an error was raised in. Used for log context only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Transform,
    Build,
    Publish,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Build => "build",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid configuration value for {field} ('{value}'): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Transient failure during {stage}: {message}")]
    TransientError {
        stage: Stage,
        status: Option<u16>,
        message: String,
    },

    #[error("Upstream API rejected {url} with status {status}: {message}")]
    UpstreamError {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Inconsistent registration snapshot (expected {expected}, got {actual}): {message}")]
    ConsistencyError {
        expected: usize,
        actual: usize,
        message: String,
    },

    #[error("Upload of '{path}' failed: {message}")]
    UploadError {
        path: String,
        status: Option<u16>,
        retryable: bool,
        message: String,
    },

    #[error("Spreadsheet build error: {message}")]
    BuildError { message: String },

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Network,
    Data,
    Upload,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::ConfigValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transient(stage: Stage, status: Option<u16>, message: impl Into<String>) -> Self {
        EtlError::TransientError {
            stage,
            status,
            message: message.into(),
        }
    }

    /// Maps a reqwest transport error (no HTTP status available) onto the taxonomy.
    pub fn from_transport(stage: Stage, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        EtlError::transient(stage, err.status().map(|s| s.as_u16()), message)
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::ConfigValidationError { .. } => ErrorCategory::Config,
            EtlError::TransientError { .. } => ErrorCategory::Network,
            EtlError::UpstreamError { .. }
            | EtlError::ConsistencyError { .. }
            | EtlError::SerializationError(_) => ErrorCategory::Data,
            EtlError::UploadError { .. } => ErrorCategory::Upload,
            EtlError::BuildError { .. } | EtlError::ZipError(_) | EtlError::IoError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Config => ErrorSeverity::Critical,
            ErrorCategory::Internal => ErrorSeverity::Critical,
            _ if self.is_retryable() => ErrorSeverity::Medium,
            _ => ErrorSeverity::High,
        }
    }

    /// Whether the next scheduled run can reasonably be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::TransientError { .. } => true,
            EtlError::UploadError { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        self.category() == ErrorCategory::Config
    }

    /// Process exit code used in single-shot mode.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EtlError::MissingConfigError { .. } => {
                "Set the missing environment variable or its *_SECRET_NAME counterpart"
            }
            EtlError::InvalidConfigValueError { .. } | EtlError::ConfigValidationError { .. } => {
                "Fix the configuration value and restart"
            }
            EtlError::TransientError { .. } => "Will be retried automatically on the next run",
            EtlError::UpstreamError { status: 401 | 403, .. } => {
                "Check the ticketing API token and its permissions"
            }
            EtlError::UpstreamError { status: 404, .. } => {
                "Check the organizer and event slugs"
            }
            EtlError::UpstreamError { .. } => "Inspect the upstream response in the logs",
            EtlError::ConsistencyError { .. } => {
                "The registration listing changed while it was being read; the next run takes a fresh snapshot"
            }
            EtlError::UploadError { status: Some(401 | 403), .. } => {
                "Check the storage username and password"
            }
            EtlError::UploadError { retryable: true, .. } => {
                "Storage endpoint unavailable; will be retried on the next run"
            }
            EtlError::UploadError { .. } => "Check the upload directory and document names",
            EtlError::BuildError { .. } | EtlError::ZipError(_) => "Check the document definitions",
            EtlError::IoError(_) => "Check file system permissions",
            EtlError::SerializationError(_) => "Inspect the upstream payload in the logs",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Config => format!("Configuration problem: {}", self),
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Data => format!("Registration data problem: {}", self),
            ErrorCategory::Upload => format!("Upload problem: {}", self),
            ErrorCategory::Internal => format!("Internal error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
