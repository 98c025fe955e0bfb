use thiserror::Error;

/// A provider payload could not be converted
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Upstream error event: {0}")]
    ErrorEvent(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FormatError {
    pub fn invalid<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        FormatError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing<F: Into<String>>(field: F) -> Self {
        FormatError::MissingField(field.into())
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Inference timed out")]
    Timeout,

    #[error("Upstream returned no usable output")]
    EmptyResponse,

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl InferenceError {
    /// The HTTP status that best describes this failure to a client
    pub fn status_code(&self) -> u16 {
        match self {
            InferenceError::Status { status, .. } => *status,
            InferenceError::Timeout => 504,
            InferenceError::Format(_) => 400,
            InferenceError::Http(e) => e.status().map(|s| s.as_u16()).unwrap_or(502),
            InferenceError::EmptyResponse => 502,
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A single policy rule is misconfigured. The rule is skipped, evaluation continues.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum PolicyError {
    #[error("Invalid pattern in policy {policy_id}: {message}")]
    InvalidPattern { policy_id: String, message: String },
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DualLlmError {
    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Template error: {0}")]
    Template(String),
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TrustedContextError {
    #[error(transparent)]
    DualLlm(#[from] DualLlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl TrustedContextError {
    pub fn status_code(&self) -> u16 {
        match self {
            TrustedContextError::DualLlm(DualLlmError::Inference(e))
            | TrustedContextError::Inference(e) => e.status_code(),
            _ => 500,
        }
    }
}
