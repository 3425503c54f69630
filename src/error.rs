use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Descriptor for a single failed validation rule, reported alongside others
/// so a client sees every problem with an upload/request at once.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDescriptor {
    pub name: String,
    pub message: String,
}

impl ErrorDescriptor {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(Vec<ErrorDescriptor>),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    #[cfg(feature = "db")]
    #[error("Database error: {message}")]
    Database { message: String },
}

impl Error {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Error::NotFound {
            resource: resource.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ErrorDescriptor>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::NotFound { .. } => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    message: self.to_string(),
                    errors: Vec::new(),
                },
            ),
            Error::BadRequest(_) | Error::UnknownTimezone(_) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: self.to_string(),
                    errors: Vec::new(),
                },
            ),
            Error::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    message: "Can not process provided data".to_string(),
                    errors,
                },
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    message: other.to_string(),
                    errors: Vec::new(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}
