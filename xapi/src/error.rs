use std::fmt::{Display, Formatter, Result as FmtResult};

/// Error codes reported by XAPI that callers act upon. Everything else is kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    DeviceAlreadyExists,
    UuidInvalid,
    HandleInvalid,
    SessionAuthenticationFailed,
    SessionInvalid,
    OperationNotAllowed,
    Other(String),
}

impl FailureKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "DEVICE_ALREADY_EXISTS" => Self::DeviceAlreadyExists,
            "UUID_INVALID" => Self::UuidInvalid,
            "HANDLE_INVALID" => Self::HandleInvalid,
            "SESSION_AUTHENTICATION_FAILED" => Self::SessionAuthenticationFailed,
            "SESSION_INVALID" => Self::SessionInvalid,
            "OPERATION_NOT_ALLOWED" => Self::OperationNotAllowed,
            other => Self::Other(other.into()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::DeviceAlreadyExists => "DEVICE_ALREADY_EXISTS",
            Self::UuidInvalid => "UUID_INVALID",
            Self::HandleInvalid => "HANDLE_INVALID",
            Self::SessionAuthenticationFailed => "SESSION_AUTHENTICATION_FAILED",
            Self::SessionInvalid => "SESSION_INVALID",
            Self::OperationNotAllowed => "OPERATION_NOT_ALLOWED",
            Self::Other(code) => code,
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Eq, thiserror::Error, PartialEq)]
pub enum XapiError {
    #[error("Failed to serialize request: {0}")]
    SerializeRequest(String),

    #[error("Failed to send request: {0}")]
    SendRequest(String),

    #[error("Received an HTTP error: {0}")]
    HttpError(String),

    #[error("Failed to parse response: {0}")]
    ParseResponse(String),

    #[error("Received an invalid response from the server: {0}")]
    InvalidResponse(String),

    #[error("Call to '{method}' failed with {kind}: [{}]", .details.join(", "))]
    Failure {
        method: String,
        kind: FailureKind,
        details: Vec<String>,
    },
}

impl XapiError {
    /// Builds a failure as reported by XAPI.
    pub fn failure(method: impl Into<String>, kind: FailureKind, details: Vec<String>) -> Self {
        Self::Failure {
            method: method.into(),
            kind,
            details,
        }
    }

    /// Returns the XAPI failure kind, if the server rejected the call.
    pub fn failure_kind(&self) -> Option<&FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Returns whether the server rejected the call with the given kind.
    pub fn is(&self, kind: &FailureKind) -> bool {
        self.failure_kind() == Some(kind)
    }
}
