use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use mongodb::bson;
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrors;

use crate::images::MAX_IMAGES_PER_PRODUCT;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Image limit reached: a product can have at most {max} images")]
    ImageLimit { max: usize },

    #[error("{0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Document decoding error: {0}")]
    BsonDecode(#[from] bson::de::Error),

    #[error("Document encoding error: {0}")]
    BsonEncode(#[from] bson::ser::Error),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn image_limit() -> Self {
        AppError::ImageLimit {
            max: MAX_IMAGES_PER_PRODUCT,
        }
    }

    /// Message safe to hand back to a client. Upstream failures are
    /// collapsed into a generic line; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(_)
            | AppError::Validation(_)
            | AppError::ImageLimit { .. }
            | AppError::Unauthorized(_) => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(format!("Invalid request: {}", errors))
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::Validation(format!("Malformed multipart body: {}", err))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::ImageLimit { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(application_error = %self, "Responding with error");
        } else {
            tracing::debug!(application_error = %self, "Rejecting request");
        }
        HttpResponse::build(status).json(json!({ "message": self.public_message() }))
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
