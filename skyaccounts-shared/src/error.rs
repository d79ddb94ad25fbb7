/// Common error type for the accounts core
///
/// Every storage, pipeline, and billing operation in this crate reports
/// failures as an [`AccountsError`]. Storage and billing client errors are
/// wrapped with the operation that produced them so callers can log a
/// meaningful chain without inspecting driver internals.
///
/// # Example
///
/// ```
/// use skyaccounts_shared::error::AccountsError;
///
/// let err = AccountsError::NotFound("user".to_string());
/// assert_eq!(err.to_string(), "user not found");
/// ```

use crate::models::user::Tier;
use std::fmt;

/// Result alias used across the shared crate
pub type AccountsResult<T> = Result<T, AccountsError>;

/// PostgreSQL SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

/// Why an operation stopped before it finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The caller cancelled the request
    Cancelled,

    /// The request deadline passed
    DeadlineExceeded,
}

impl fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptReason::Cancelled => write!(f, "cancelled"),
            InterruptReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Error type for all core operations
#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    /// The user or resource is absent
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness violation (subject, skylink)
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Aggregation or statement execution failed
    #[error("{context}: {source}")]
    QueryFailure {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    /// A stored document could not be decoded
    #[error("failed to decode {context}: {message}")]
    DecodeFailure { context: String, message: String },

    /// Opaque failure; the detail is for logs only
    #[error("general internal failure")]
    InternalFailure(String),

    /// A billing provider call failed
    #[error("billing provider call failed ({context}): {message}")]
    ExternalServiceFailure {
        context: String,
        message: String,
        status: Option<u16>,
    },

    /// A primary failure followed by a failed compensating action
    #[error("{primary}; compensation failed: {compensation}")]
    CompositeFailure {
        primary: Box<AccountsError>,
        compensation: Box<AccountsError>,
    },

    /// Caller supplied an invalid value
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A pipeline was assembled in an order the compiler does not accept
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// An index exists under the required name with a different definition
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// No billing-side plan maps to the tier
    #[error("no billing plan configured for tier {0}")]
    PlanNotConfigured(Tier),

    /// A conditional write kept losing to concurrent writers
    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    /// The request was cancelled or ran past its deadline
    #[error("{operation} interrupted: {reason}")]
    Interrupted {
        operation: &'static str,
        reason: InterruptReason,
    },
}

impl AccountsError {
    /// Wraps a storage error with the operation that produced it
    ///
    /// Unique constraint violations become [`AccountsError::AlreadyExists`]
    /// and column decoding errors [`AccountsError::DecodeFailure`];
    /// everything else is a [`AccountsError::QueryFailure`].
    pub fn storage(context: impl Into<String>, err: sqlx::Error) -> Self {
        let context = context.into();
        if is_unique_violation(&err) {
            return AccountsError::AlreadyExists(context);
        }
        if matches!(err, sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) {
            return AccountsError::decode(context, err);
        }
        AccountsError::QueryFailure {
            context,
            source: err,
        }
    }

    /// Wraps a document decoding error
    pub fn decode(context: impl Into<String>, err: impl fmt::Display) -> Self {
        AccountsError::DecodeFailure {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Composes a primary failure with the outcome of its compensation
    ///
    /// A successful compensation leaves the primary error untouched.
    pub fn compose(primary: AccountsError, compensation: Option<AccountsError>) -> Self {
        match compensation {
            None => primary,
            Some(compensation) => AccountsError::CompositeFailure {
                primary: Box::new(primary),
                compensation: Box::new(compensation),
            },
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = AccountsError::NotFound("user".to_string());
        assert_eq!(err.to_string(), "user not found");
    }

    #[test]
    fn test_internal_failure_hides_detail() {
        let err = AccountsError::InternalFailure("pool exhausted on node 3".to_string());
        assert_eq!(err.to_string(), "general internal failure");
    }

    #[test]
    fn test_compose_without_compensation_failure() {
        let err = AccountsError::compose(AccountsError::NotFound("user".to_string()), None);
        assert!(matches!(err, AccountsError::NotFound(_)));
        assert!(!matches!(err, AccountsError::CompositeFailure { .. }));
    }

    #[test]
    fn test_compose_with_compensation_failure() {
        let err = AccountsError::compose(
            AccountsError::InternalFailure("db down".to_string()),
            Some(AccountsError::ExternalServiceFailure {
                context: "revert plan".to_string(),
                message: "timeout".to_string(),
                status: None,
            }),
        );
        assert!(matches!(err, AccountsError::CompositeFailure { .. }));
        assert_eq!(
            err.to_string(),
            "general internal failure; compensation failed: billing provider call failed (revert plan): timeout"
        );
    }

    #[test]
    fn test_storage_maps_row_not_found_to_query_failure() {
        let err = AccountsError::storage("load user", sqlx::Error::RowNotFound);
        assert!(matches!(err, AccountsError::QueryFailure { .. }));
    }

    #[test]
    fn test_interrupted_display() {
        let err = AccountsError::Interrupted {
            operation: "count",
            reason: InterruptReason::DeadlineExceeded,
        };
        assert_eq!(err.to_string(), "count interrupted: deadline exceeded");
    }
}
