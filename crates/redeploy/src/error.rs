//! Error types for bulk redeploy operations.
//!
//! Only conditions that abort a whole call are errors. Per-service problems
//! (ineligible, executor failure, unknown keypath) are recorded on the
//! service and in the batch report instead.

use thiserror::Error;

/// Categories of errors, used by callers to pick exit codes and advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself is malformed
    Input,
    /// Repository state does not allow the operation
    State,
    /// A collaborator (repository, inventory) failed
    Backend,
}

impl ErrorCategory {
    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Input => "Check the targets and schedule given on the command line",
            Self::State => "Populate the service list and check the settings",
            Self::Backend => "Check the executor command and the state file",
        }
    }
}

/// Errors that abort a bulk call before anything is committed.
#[derive(Debug, Error)]
pub enum Error {
    /// The service list is empty
    #[error("service list is empty, run service-list populate first")]
    RepositoryUninitialized,

    /// Mutually exclusive target options were combined
    #[error("invalid target combination: {0}")]
    InvalidTargetCombination(String),

    /// Requested schedule time precedes now
    #[error("scheduled time {requested} is in the past (now {now})")]
    ScheduleInPast {
        /// Requested base time, RFC 3339
        requested: String,
        /// Current time, RFC 3339
        now: String,
    },

    /// Schedule string is neither an ISO date nor an `Hh Mm` offset
    #[error("invalid schedule '{input}': {message}")]
    InvalidSchedule {
        /// The raw schedule string
        input: String,
        /// What was wrong with it
        message: String,
    },

    /// A wildcard pattern is not a valid regular expression
    #[error("invalid wildcard #{index} '{pattern}': {source}")]
    InvalidWildcard {
        /// 1-based table index
        index: usize,
        /// The offending pattern
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// No top-level service types are configured for populate
    #[error("no top-level service types configured")]
    NoServiceTypes,

    /// Service repository failure
    #[error("repository error: {0}")]
    Repository(String),

    /// Service inventory failure while listing top-level services
    #[error("inventory error: {0}")]
    Inventory(String),
}

impl Error {
    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidTargetCombination(_)
            | Error::ScheduleInPast { .. }
            | Error::InvalidSchedule { .. }
            | Error::InvalidWildcard { .. } => ErrorCategory::Input,
            Error::RepositoryUninitialized | Error::NoServiceTypes => ErrorCategory::State,
            Error::Repository(_) | Error::Inventory(_) => ErrorCategory::Backend,
        }
    }

    pub(crate) fn invalid_schedule(input: &str, message: impl Into<String>) -> Self {
        Error::InvalidSchedule {
            input: input.to_string(),
            message: message.into(),
        }
    }
}

/// Failure raised by the redeploy executor for one service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type for bulk redeploy operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::RepositoryUninitialized.category(),
            ErrorCategory::State
        );
        assert_eq!(
            Error::InvalidTargetCombination("x".into()).category(),
            ErrorCategory::Input
        );
        assert_eq!(
            Error::Repository("disk full".into()).category(),
            ErrorCategory::Backend
        );
    }

    #[test]
    fn test_schedule_error_message() {
        let err = Error::invalid_schedule("6h", "minutes are required");
        assert_eq!(err.to_string(), "invalid schedule '6h': minutes are required");
    }
}
