//! Error types for the Groundwork reconciliation engine.
//!
//! This module provides a comprehensive error hierarchy for all phases
//! of a reconciliation run: descriptor loading, graph construction, state
//! management, planning, and plan execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Groundwork engine.
#[derive(Debug, Error)]
pub enum GroundworkError {
    /// Descriptor-related errors.
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Dependency graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Plan execution errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Descriptor-related errors.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The descriptor file was not found.
    #[error("Descriptor file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The descriptor file could not be parsed.
    #[error("Failed to parse descriptor: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Descriptor validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate logical resource name.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated logical name.
        name: String,
    },

    /// A reference expression could not be parsed.
    #[error("Invalid reference expression '{expr}': {reason}")]
    InvalidReference {
        /// The offending expression.
        expr: String,
        /// Why it is invalid.
        reason: String,
    },
}

/// Dependency graph errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The descriptor set contains a reference cycle.
    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle {
        /// The resources on the cycle, in reference order, with the first
        /// resource repeated at the end.
        path: Vec<String>,
    },

    /// A reference points at a logical name that is not declared.
    #[error("Resource '{from}' references unknown resource '{target}' (field '{field}')")]
    UnknownReference {
        /// The referencing resource.
        from: String,
        /// The property field holding the reference.
        field: String,
        /// The undeclared target name.
        target: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Backend I/O error while persisting or reading a record.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Provider errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transient failure (timeout, throttling). Retried with backoff.
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Provider-suggested delay before retrying, if any.
        retry_after_secs: Option<u64>,
    },

    /// Non-retryable failure (validation, permission).
    #[error("Provider operation failed: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },

    /// The physical resource does not exist.
    #[error("Physical resource not found: {physical_id}")]
    NotFound {
        /// The missing physical identifier.
        physical_id: String,
    },

    /// The retry budget for a transient failure was exhausted.
    #[error("Provider {operation} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// The operation that was retried.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last transient error message.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A destructive action was required on a protected resource.
    #[error("Resource '{name}' is protected; refusing to {action} it")]
    ProtectedResource {
        /// The protected logical name.
        name: String,
        /// The refused action ("replace" or "delete").
        action: String,
    },

    /// A step's dependency is missing from the plan.
    #[error("Step for '{name}' depends on '{dependency}', which has no step")]
    MissingDependency {
        /// The dependent resource.
        name: String,
        /// The missing dependency.
        dependency: String,
    },
}

/// Plan execution errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// One or more steps failed or were blocked.
    #[error("{failed} step(s) failed and {blocked} blocked; successful steps were persisted")]
    Incomplete {
        /// Number of failed steps.
        failed: usize,
        /// Number of blocked steps.
        blocked: usize,
    },

    /// The run was cancelled between steps.
    #[error("Apply cancelled; {completed} steps completed before cancellation")]
    Cancelled {
        /// Number of steps that completed before cancellation.
        completed: usize,
    },

    /// A reference could not be resolved at execution time.
    #[error("Cannot resolve {reference} for '{resource}': dependency has no such output")]
    UnresolvedReference {
        /// The resource whose step needed the value.
        resource: String,
        /// The reference expression.
        reference: String,
    },
}

/// Result type alias for Groundwork operations.
pub type Result<T> = std::result::Result<T, GroundworkError>;

impl GroundworkError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::Transient { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::Transient {
                retry_after_secs: Some(secs),
                ..
            }) => Some(*secs),
            Self::Provider(ProviderError::Transient { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl DescriptorError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error without a suggested delay.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Creates a non-retryable failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns true if this error should be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_is_retryable() {
        let err = GroundworkError::Provider(ProviderError::transient("throttled"));
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(5));
    }

    #[test]
    fn test_failed_is_not_retryable() {
        let err = GroundworkError::Provider(ProviderError::failed("access denied"));
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }

    #[test]
    fn test_cycle_display_joins_path() {
        let err = GraphError::Cycle {
            path: vec![
                String::from("a"),
                String::from("b"),
                String::from("a"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected: a -> b -> a"
        );
    }
}
