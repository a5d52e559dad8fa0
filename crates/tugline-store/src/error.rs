//! Error types for the storage layer.

/// Errors from the relational adapter and the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The row exists but violates a content invariant (e.g. a question
    /// with no correct option).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The underlying database rejected or failed the statement.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backend is temporarily unreachable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Pool exhaustion and I/O interruptions are transient; constraint
    /// violations, missing rows, and decode failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::NotFound(_) | Self::Corrupt(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_retryable() {
        assert!(!StoreError::NotFound("question".into()).is_retryable());
    }

    #[test]
    fn test_unavailable_is_retryable() {
        assert!(StoreError::Unavailable("pool down".into()).is_retryable());
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn test_row_not_found_database_error_is_not_retryable() {
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_retryable());
    }
}
