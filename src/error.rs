//! Error types for projectflow
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad arguments, missing workspace, invalid configuration)
//! - 3: Conflict (optimistic-concurrency check failed)
//! - 4: Operation failed (remote failure, internal invariant violation)
//! - 5: Retry request (credentials were invalidated; retrying will refresh them)

use thiserror::Error;

/// Exit codes for the projectflow CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
    pub const RETRY_REQUEST: i32 = 5;
}

/// Caller-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Fatal,
    Transient,
    Internal,
    /// The cached credential was invalidated; the same request can be retried.
    RetryRequest,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
            ErrorKind::RetryRequest => "retry_request",
        }
    }
}

/// Main error type for projectflow operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Credentials expired, please retry the request: {0}")]
    CredentialsExpired(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request failed: {0}")]
    Fatal(String),

    #[error("{message} (gave up after {attempts} attempts)")]
    Transient { message: String, attempts: u32 },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Classify this error into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::CredentialsExpired(_) => ErrorKind::RetryRequest,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::Fatal(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => ErrorKind::Fatal,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Internal(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::NotFound(_)
            | Error::Forbidden(_) => exit_codes::USER_ERROR,

            Error::Conflict(_) => exit_codes::CONFLICT,

            Error::CredentialsExpired(_) => exit_codes::RETRY_REQUEST,

            Error::Fatal(_)
            | Error::Transient { .. }
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON output, when the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Transient { message, attempts } => Some(serde_json::json!({
                "message": message,
                "attempts": attempts,
            })),
            Error::InvalidConfig(message) | Error::InvalidArgument(message) => {
                Some(serde_json::json!({ "message": message }))
            }
            _ => None,
        }
    }

    /// Rewrite occurrences of a raw reference name with a logical subject name.
    ///
    /// Only message-carrying variants are rewritten; wrapped library errors
    /// are returned unchanged.
    pub fn with_subject(self, raw: &str, logical: &str) -> Self {
        if raw.is_empty() {
            return self;
        }
        let swap = |message: String| message.replace(raw, logical);
        match self {
            Error::NotFound(m) => Error::NotFound(swap(m)),
            Error::Forbidden(m) => Error::Forbidden(swap(m)),
            Error::CredentialsExpired(m) => Error::CredentialsExpired(swap(m)),
            Error::Conflict(m) => Error::Conflict(swap(m)),
            Error::Fatal(m) => Error::Fatal(swap(m)),
            Error::Internal(m) => Error::Internal(swap(m)),
            Error::Transient { message, attempts } => Error::Transient {
                message: swap(message),
                attempts,
            },
            other => other,
        }
    }
}

/// Result type alias for projectflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            kind: err.kind().as_str(),
            details: err.details(),
        }
    }
}
