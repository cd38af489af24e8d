//! Error taxonomy shared by the fetch engine, CRUD resolvers and the GraphQL boundary.
//!
//! Client-safe errors carry a category code (400/401/404) and always keep their
//! message. Everything else is treated as an internal failure: logged in full and
//! replaced by a generic message unless the request runs in debug mode.

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Result alias used across the crate.
pub type ApiResult<T> = Result<T, ApiError>;

/// Message returned to clients for unclassified failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// HTTP-like category attached to client-safe errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BadRequest,
    Unauthorized,
    NotFound,
}

impl ErrorCategory {
    pub fn code(self) -> i32 {
        match self {
            ErrorCategory::BadRequest => 400,
            ErrorCategory::Unauthorized => 401,
            ErrorCategory::NotFound => 404,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The `filters` expression of a many query could not be compiled.
    #[error("Bad request: Invalid filters")]
    InvalidFilter,

    /// The field selection cannot be planned (e.g. `onPageCount` without `data`).
    #[error("Bad request: {0}")]
    InvalidSelection(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Object '{0}' not found")]
    NotFound(String),

    /// Raised by an external auth collaborator and passed through unchanged.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_selection(message: impl Into<String>) -> Self {
        ApiError::InvalidSelection(message.into())
    }

    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ApiError::InvalidFilter | ApiError::InvalidSelection(_) | ApiError::BadRequest(_) => {
                Some(ErrorCategory::BadRequest)
            }
            ApiError::NotFound(_) => Some(ErrorCategory::NotFound),
            ApiError::Unauthorized(_) => Some(ErrorCategory::Unauthorized),
            ApiError::Database(_) | ApiError::Internal(_) => None,
        }
    }

    pub fn is_client_safe(&self) -> bool {
        self.category().is_some()
    }

    /// Convert into a GraphQL error, masking internal failures outside debug mode.
    pub fn into_graphql_error(self, debug: bool) -> async_graphql::Error {
        if let Some(category) = self.category() {
            return async_graphql::Error::new(self.to_string())
                .extend_with(|_, e| e.set("category", category.code()));
        }

        tracing::error!(error = ?self, "Unhandled resolver error");

        if debug {
            let debug_message = format!("{self:?}");
            async_graphql::Error::new(self.to_string())
                .extend_with(|_, e| e.set("debugMessage", debug_message))
        } else {
            async_graphql::Error::new(INTERNAL_ERROR_MESSAGE)
        }
    }
}
