use crate::engine::provider::ProviderError;
use crate::engine::sources::SourceError;

/// App-wide error type. Every fallible function returns `Result<T, AppError>`.
/// The `kind()` string is what crosses process boundaries — stack traces and
/// driver internals never do.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Uniqueness / business-rule violation with a stable code
    /// (e.g. MODEL_IN_USE, LAST_PRICING, CANNOT_DEMOTE_SELF).
    #[error("{code}: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("Admin privileges required")]
    AdminRequired,

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Stable kind string for log context and API envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Conflict { code, .. } => code,
            AppError::AdminRequired => "admin_required",
            AppError::Provider(_) => "provider",
            AppError::Source(_) => "source",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::Http(_) => "http",
            AppError::Internal(_) => "internal",
        }
    }

    /// True when the error is a UNIQUE constraint violation. The dedup and
    /// link-creation paths use this to decide whether a savepoint rollback
    /// plus re-query can recover.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_kind_is_code() {
        let err = AppError::conflict("MODEL_IN_USE", "model 'x' is routed");
        assert_eq!(err.kind(), "MODEL_IN_USE");
        assert_eq!(err.to_string(), "MODEL_IN_USE: model 'x' is routed");
    }

    #[test]
    fn test_unique_violation_detection() {
        let err: AppError = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            Some("UNIQUE constraint failed: persona_jobs.persona_id".into()),
        )
        .into();
        assert!(err.is_unique_violation());

        let not_unique = AppError::NotFound("Persona x".into());
        assert!(!not_unique.is_unique_violation());
    }
}
