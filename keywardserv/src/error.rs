use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

/// Failures of the license store. None of these is a verification verdict:
/// callers answer with a retryable "temporarily unavailable" instead of a
/// negative check-in result.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// No connection could be obtained within the store timeout.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The write lock was held by a concurrent transaction past the busy timeout.
    #[error("concurrent modification: {0}")]
    Conflict(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::Unavailable(_) | StoreError::Conflict(_) | StoreError::Query(_) => 503,
            StoreError::Constraint(_) => 409,
        }
    }

    /// Log the error at a level matching how alarming it is.
    pub fn log_store_event(&self) {
        match self {
            StoreError::Unavailable(msg) => {
                tracing::error!("License store unreachable: {}", msg);
            }
            StoreError::Conflict(msg) => {
                tracing::warn!("License store busy, transaction abandoned: {}", msg);
            }
            StoreError::Constraint(msg) => {
                tracing::warn!("License store rejected write: {}", msg);
            }
            StoreError::Query(msg) => {
                tracing::error!("License store query failed: {}", msg);
            }
        }
    }
}

impl From<DieselError> for StoreError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::DatabaseError(kind, info) => {
                let message = info.message().to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation
                    | DatabaseErrorKind::ForeignKeyViolation
                    | DatabaseErrorKind::NotNullViolation
                    | DatabaseErrorKind::CheckViolation => StoreError::Constraint(message),
                    DatabaseErrorKind::SerializationFailure => StoreError::Conflict(message),
                    DatabaseErrorKind::ClosedConnection => StoreError::Unavailable(message),
                    _ if is_lock_contention(&message) => StoreError::Conflict(message),
                    _ => StoreError::Query(message),
                }
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// SQLite reports SQLITE_BUSY / SQLITE_LOCKED only through the message text.
fn is_lock_contention(message: &str) -> bool {
    message.contains("database is locked") || message.contains("database table is locked")
}
