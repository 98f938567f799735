//! Error taxonomy shared by the portcullis daemon and CLI.

use thiserror::Error;

/// Result type for portcullis operations.
pub type PortcullisResult<T> = Result<T, PortcullisError>;

/// A single (json-pointer path, message) validation failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A single per-rule compilation failure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct RuleError {
    pub rule_id: String,
    pub message: String,
}

impl RuleError {
    pub fn new(rule_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RuleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.rule_id, self.message)
    }
}

/// Stable error tags surfaced to IPC clients and the audit journal.
///
/// The `code()` method below is what gets written into `error_code` fields
/// and audit events, so the tag text is load-bearing -- it is part of the
/// wire contract, not just a debugging aid.
#[derive(Debug, Error)]
pub enum PortcullisError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("in use: {0}")]
    InUse(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("busy: mutator lock not acquired within timeout")]
    Busy,

    #[error("kernel error 0x{code:08x}: {message}")]
    KernelError { code: u32, message: String },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("validation failed: {} error(s)", .0.len())]
    ValidationFailed(Vec<FieldError>),

    #[error("compilation failed: {} error(s)", .0.len())]
    CompilationFailed(Vec<RuleError>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PortcullisError {
    /// Stable string tag for this error, as surfaced over IPC and in audit events.
    pub fn code(&self) -> &'static str {
        match self {
            PortcullisError::InvalidArgument(_) => "InvalidArgument",
            PortcullisError::Unauthorized => "Unauthorized",
            PortcullisError::NotFound(_) => "NotFound",
            PortcullisError::AlreadyExists(_) => "AlreadyExists",
            PortcullisError::InUse(_) => "InUse",
            PortcullisError::InvalidState(_) => "InvalidState",
            PortcullisError::Busy => "Busy",
            PortcullisError::KernelError { .. } => "KernelError",
            PortcullisError::IoError(_) => "IoError",
            PortcullisError::ValidationFailed(_) => "ValidationFailed",
            PortcullisError::CompilationFailed(_) => "CompilationFailed",
            PortcullisError::Internal(_) => "Internal",
        }
    }
}

impl From<std::io::Error> for PortcullisError {
    fn from(err: std::io::Error) -> Self {
        PortcullisError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PortcullisError {
    fn from(err: serde_json::Error) -> Self {
        PortcullisError::InvalidArgument(format!("JSON error: {}", err))
    }
}

impl From<String> for PortcullisError {
    fn from(err: String) -> Self {
        PortcullisError::Internal(err)
    }
}

impl From<&str> for PortcullisError {
    fn from(err: &str) -> Self {
        PortcullisError::Internal(err.to_string())
    }
}
