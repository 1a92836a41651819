use std::time::Duration;

/// Verdicts from the SQL safety validator.
///
/// `BlockedPattern` deliberately carries no detail about which pattern
/// matched, so callers cannot probe the blocklist one error message at a
/// time. The command-document variants may echo the caller-supplied verb:
/// it came from the caller in the first place.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query is empty")]
    EmptyQuery,
    #[error("multiple statements are not allowed")]
    MultipleStatements,
    #[error("only SELECT and WITH statements are allowed")]
    NotReadOnly,
    #[error("query contains a blocked pattern")]
    BlockedPattern,
    #[error("command '{0}' is not allowed on this backend")]
    CommandNotAllowed(String),
    #[error("invalid command document: {0}")]
    InvalidCommand(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("query failed: {0}")]
    Execution(String),
    #[error("unsupported database type: {0}")]
    UnsupportedBackend(String),
    #[error("adapter is not connected")]
    NotConnected,
    #[error("adapter is closed")]
    Closed,
}

impl DbError {
    /// True for errors a caller may reasonably retry with a larger budget.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DbError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_deadline_errors_count_as_timeouts() {
        assert!(DbError::Timeout(Duration::from_secs(5)).is_timeout());
        assert!(!DbError::NotConnected.is_timeout());
        assert!(!DbError::Execution("connection reset".to_string()).is_timeout());
        assert!(!DbError::Validation(ValidationError::EmptyQuery).is_timeout());
    }
}
