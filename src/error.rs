//! Application error taxonomy
//!
//! Every fallible operation in the payment subsystem returns [`AppError`]. The
//! kind decides the HTTP status a handler answers with; the message decides
//! what the client is allowed to see.

use crate::database::error::DatabaseError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Result type used across the service layer
pub type AppResult<T> = Result<T, AppError>;

/// Errors caused by the request or by the current state of the domain
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Bad or missing input, unsupported method, amount below minimum
    #[error("{message}")]
    Validation { message: String },

    /// Unknown order, payment, or gateway-referenced entity
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Stored and received success indicators disagree
    #[error("{message}")]
    IntegrityMismatch { message: String },
}

/// Errors reported by, or while talking to, an external gateway
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("{provider}: {message}")]
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },

    #[error("{service} rate limit exceeded")]
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },

    #[error("{service} did not answer within {seconds} seconds")]
    Timeout { service: String, seconds: u64 },
}

/// Failures of our own infrastructure. Never shown verbatim in production.
#[derive(Debug, Clone, Error)]
pub enum InfrastructureError {
    #[error("{0}")]
    Database(#[from] DatabaseError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

#[derive(Debug, Clone, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    Domain(DomainError),
    #[error(transparent)]
    External(ExternalError),
    #[error(transparent)]
    Infrastructure(InfrastructureError),
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
    expose_details: bool,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
            expose_details: false,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Include the raw error text in 5xx bodies (non-production only)
    pub fn exposing_details(mut self, expose: bool) -> Self {
        self.expose_details = expose;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::Validation {
            message: message.into(),
        }))
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }))
    }

    pub fn integrity_mismatch(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::IntegrityMismatch {
            message: message.into(),
        }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Internal {
            message: message.into(),
        }))
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>, is_retryable: bool) -> Self {
        Self::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: provider.into(),
            message: message.into(),
            is_retryable,
        }))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, AppErrorKind::Domain(DomainError::NotFound { .. }))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, AppErrorKind::Domain(DomainError::Validation { .. }))
    }

    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::IntegrityMismatch { .. })
        )
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(_) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database(e)) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(DomainError::Validation { .. })
            | AppErrorKind::Domain(DomainError::IntegrityMismatch { .. }) => StatusCode::BAD_REQUEST,
            AppErrorKind::Domain(DomainError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppErrorKind::External(_) => StatusCode::BAD_GATEWAY,
            AppErrorKind::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for response bodies
    pub fn error_code(&self) -> &'static str {
        match &self.kind {
            AppErrorKind::Domain(DomainError::Validation { .. }) => "validation_error",
            AppErrorKind::Domain(DomainError::NotFound { .. }) => "not_found",
            AppErrorKind::Domain(DomainError::IntegrityMismatch { .. }) => "integrity_mismatch",
            AppErrorKind::External(_) => "gateway_error",
            AppErrorKind::Infrastructure(_) => "internal_error",
        }
    }

    /// Message safe to return to an untrusted caller
    pub fn public_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Infrastructure(_) => "Internal server error".to_string(),
            kind => kind.to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database(err)))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::internal(format!("JSON error: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "success": false,
            "error": self.error_code(),
            "message": self.public_message(),
        });

        if self.expose_details && status.is_server_error() {
            body["detail"] = serde_json::Value::String(self.to_string());
        }

        (status, Json(body)).into_response()
    }
}
