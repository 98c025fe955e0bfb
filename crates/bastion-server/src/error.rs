use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bastion::errors::{FormatError, InferenceError, TrustedContextError};
use serde_json::json;
use thiserror::Error;

pub const ENV_PREFIX: &str = "BASTION";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Failed to load policy file {path}: {message}")]
    PolicyFile { path: String, message: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted settings path
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        field_path.replace('.', "__").to_uppercase()
    )
}

/// Errors a proxy route reports to the client as `{"error": {"message", "type"}}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    TrustedContext(#[from] TrustedContextError),

    #[error("{0}")]
    NotSupported(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let code = match self {
            ApiError::Format(_) | ApiError::NotSupported(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::NotFound(_) => 404,
            ApiError::Inference(e) => e.status_code(),
            ApiError::TrustedContext(e) => e.status_code(),
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY)
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Format(_) => "invalid_request_error",
            ApiError::NotSupported(_) => "not_supported",
            ApiError::Unauthorized(_) => "authentication_error",
            ApiError::NotFound(_) => "not_found_error",
            ApiError::Inference(_) => "upstream_error",
            ApiError::TrustedContext(TrustedContextError::Store(_)) => "internal_error",
            ApiError::TrustedContext(_) => "upstream_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion::errors::{DualLlmError, StoreError};

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("server.port"), "BASTION_SERVER__PORT");
        assert_eq!(to_env_var("dual_llm.max_rounds"), "BASTION_DUAL_LLM__MAX_ROUNDS");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(FormatError::missing("messages")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(InferenceError::Timeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(TrustedContextError::from(DualLlmError::from(
                InferenceError::Status {
                    status: 429,
                    message: "rate limited".to_string()
                }
            )))
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let store = ApiError::from(TrustedContextError::from(StoreError::Unavailable(
            "down".to_string(),
        )));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.error_type(), "internal_error");
    }
}
