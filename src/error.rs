use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("account pool is empty")]
    NoAccounts,

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("project id resolution failed: {0}")]
    ProjectResolution(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream returned {status}: {body}")]
    UpstreamStatus {
        status: StatusCode,
        body: String,
        retryable: bool,
    },

    #[error("request translation failed: {0}")]
    Translation(String),

    #[error("invalid client request: {0}")]
    InvalidRequest(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// Whether a retry against a different account is worth attempting.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::UpstreamStatus { retryable, .. } => *retryable,
            AppError::OAuth(_) | AppError::ProjectResolution(_) | AppError::Upstream(_) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoAccounts => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Cancelled => StatusCode::from_u16(499).unwrap(),
            AppError::UpstreamStatus { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": {
                "type": "api_error",
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
