//! Central error taxonomy (spec §7).
//!
//! Every catch site in this crate classifies the failure into one of these
//! variants rather than propagating a raw HTTP status -- callers branch on
//! *meaning* (validation, transient, permanent, conflict, integrity, auth),
//! not on status codes.

use serde_json::Value;
use std::fmt;

/// A structured server error envelope, normalized from either
/// `{error: string}` or `{error: {code, message, details?}}` (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// User-correctable input rejected before any request was sent.
    #[error("validation: {0}")]
    Validation(String),

    /// Network error, 5xx, or a 524 gateway timeout. Callers absorb these
    /// inside pollers (spec §7.2) and only bubble them after a tolerance
    /// threshold is exceeded.
    #[error("transient: {0}")]
    Transient(String),

    /// A long-running job reached a terminal `failed` status with a
    /// server-provided message.
    #[error("job failed: {0}")]
    JobFailed(String),

    /// 409-class conflict: something is already in flight server-side.
    #[error("state conflict: {0}")]
    Conflict(String),

    /// PRESERVE_INTEGRITY_ERROR / PROJECT_JSON_INVALID and similar: the
    /// current action cannot proceed without the user fixing source material.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// 401: the caller has no valid session.
    #[error("authentication required")]
    Auth,

    /// Catch-all for a classified HTTP error that doesn't fit the above.
    #[error("http {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
        details: Option<Value>,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Known error codes the core branches on (spec §6).
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Transient errors are the only ones a poller should swallow and retry.
    /// A 524 is explicitly transient (spec §4.5): the backend kept working.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 524,
            _ => false,
        }
    }

    /// Builds a classified [`Error`] from a raw status + normalized envelope,
    /// following the §7 taxonomy.
    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        match (envelope.status, envelope.code.as_deref()) {
            (401, _) => Self::Auth,
            (_, Some("PRESERVE_INTEGRITY_ERROR" | "PROJECT_JSON_INVALID")) => {
                Self::Integrity(envelope.message)
            }
            (409, _) | (_, Some("CONCURRENT_LIMIT")) => Self::Conflict(envelope.message),
            (status, _) if status >= 500 || status == 524 => Self::Transient(envelope.message),
            (status, code) => Self::Http {
                status,
                code: code.map(str::to_string),
                message: envelope.message,
                details: envelope.details,
            },
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
