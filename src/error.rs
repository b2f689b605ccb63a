use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    ProcessLaunch,
    SessionReadyTimeout,
    BrokenSession,
    Transport,
    MalformedRequest,
    ServerUnavailable,
    AddressInUse,
    ExecTimeout,
    IoError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("{0}")]
    Api(ApiError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<ApiError> for PipeError {
    fn from(value: ApiError) -> Self {
        Self::Api(value)
    }
}

impl PipeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipeError::Api(api) => api.error_code,
            PipeError::Io(_) => ErrorCode::IoError,
            PipeError::Json(_) => ErrorCode::MalformedRequest,
            PipeError::Csv(_) => ErrorCode::InvalidArgument,
        }
    }

    /// Errors after which the shell session cannot serve further requests.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ProcessLaunch | ErrorCode::SessionReadyTimeout | ErrorCode::BrokenSession
        )
    }

    pub fn to_api_error(&self) -> ApiError {
        match self {
            PipeError::Api(api) => api.clone(),
            other => ApiError::new(other.code(), other.to_string()),
        }
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::ProcessLaunch => "PROCESS_LAUNCH",
            ErrorCode::SessionReadyTimeout => "SESSION_READY_TIMEOUT",
            ErrorCode::BrokenSession => "BROKEN_SESSION",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::MalformedRequest => "MALFORMED_REQUEST",
            ErrorCode::ServerUnavailable => "SERVER_UNAVAILABLE",
            ErrorCode::AddressInUse => "ADDRESS_IN_USE",
            ErrorCode::ExecTimeout => "EXEC_TIMEOUT",
            ErrorCode::IoError => "IO_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type PipeResult<T> = Result<T, PipeError>;
