//! Database error types
//!
//! Wraps sqlx failures into a small set of kinds so callers can decide
//! whether a retry makes sense without matching on driver internals.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Pool exhausted: {message}")]
    PoolExhausted { message: String },

    #[error("Database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::PoolTimedOut => DatabaseErrorKind::PoolExhausted {
                message: "timed out waiting for a connection".to_string(),
            },
            sqlx::Error::PoolClosed => DatabaseErrorKind::ConnectionError {
                message: "connection pool is closed".to_string(),
            },
            sqlx::Error::Io(e) => DatabaseErrorKind::ConnectionError {
                message: e.to_string(),
            },
            sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
                DatabaseErrorKind::ConstraintViolation {
                    message: db_err.message().to_string(),
                }
            }
            other => DatabaseErrorKind::Unknown {
                message: other.to_string(),
            },
        };

        Self { kind }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::ConnectionError { .. } | DatabaseErrorKind::PoolExhausted { .. }
        )
    }
}

impl From<DatabaseError> for crate::error::AppError {
    fn from(err: DatabaseError) -> Self {
        use crate::error::{AppError, AppErrorKind, InfrastructureError};

        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            is_retryable: err.is_retryable(),
            message: err.to_string(),
        }))
    }
}
