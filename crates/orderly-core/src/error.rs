//! Unified error types for the data-access layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A failure reported by the relational store.
///
/// Carries the driver message verbatim plus the SQLSTATE code when the driver
/// exposes one, so callers can classify without parsing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbError {
    /// SQLSTATE code (e.g. `42601`), if known.
    pub code: Option<String>,
    /// Original driver message.
    pub message: String,
}

impl DbError {
    /// Creates a database error without a SQLSTATE code.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Creates a database error with a SQLSTATE code.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Unified error type for the Orderly data-access layer.
#[derive(Error, Debug)]
pub enum OrderlyError {
    // ============ Request Errors ============
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict error (e.g., duplicate entry)
    #[error("Conflict: {0}")]
    Conflict(String),

    // ============ Infrastructure Errors ============
    /// Statement failed inside the relational store
    #[error("Database error: {0}")]
    Database(DbError),

    /// Connection could not be acquired from the pool
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Transaction body failed and the rollback failed too
    #[error("Transaction rollback failed ({rollback}) after: {source}")]
    Rollback {
        #[source]
        source: Box<OrderlyError>,
        rollback: Box<OrderlyError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Redis/Cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ============ Resilience Errors ============
    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrderlyError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Pool(_) => "POOL_ERROR",
            Self::Rollback { .. } => "ROLLBACK_FAILED",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a database error from a bare message.
    #[must_use]
    pub fn database<T: Into<String>>(message: T) -> Self {
        Self::Database(DbError::new(message))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the SQLSTATE code carried by a database error, if any.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database(db) => db.code.as_deref(),
            _ => None,
        }
    }

    /// Returns the underlying failure message without the variant prefix.
    #[must_use]
    pub fn raw_message(&self) -> String {
        match self {
            Self::Database(db) => db.message.clone(),
            Self::Validation(m)
            | Self::Conflict(m)
            | Self::Pool(m)
            | Self::Configuration(m)
            | Self::Cache(m)
            | Self::Serialization(m)
            | Self::Timeout(m)
            | Self::Internal(m) => m.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for OrderlyError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound {
                resource_type: "database_row",
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => Self::Database(DbError {
                code: db_err.code().map(|c| c.into_owned()),
                message: db_err.message().to_string(),
            }),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Pool(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Serialization(err.to_string()),
            _ => Self::database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for OrderlyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}
