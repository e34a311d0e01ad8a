//! Error types for entity resolution.
//!
//! All errors are strongly typed using thiserror. Scanning errors and merge
//! errors are kept apart: a scan never mutates the graph, while a merge is an
//! all-or-nothing transaction whose failure is surfaced verbatim.

use thiserror::Error;

use crate::graph::{EntityType, NodeId};
use crate::storage::StorageError;

/// Coarse error classification shared by every error in the crate.
///
/// Callers that only need to decide how to react (show a message, retry,
/// page someone) can match on this instead of the concrete variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad caller input (threshold, weights, ids, actor).
    Validation,
    /// Unknown node id.
    NotFound,
    /// Request conflicts with the current graph state.
    Conflict,
    /// Lock contention or timeout in the store.
    Concurrency,
    /// Unexpected collaborator failure.
    Internal,
}

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Threshold {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange {
        value: f64,
    },

    #[error("Weight '{name}' must be finite and non-negative, got {value}")]
    InvalidWeight {
        name: &'static str,
        value: f64,
    },

    #[error("Label, alias and jaccard weights sum to zero")]
    WeightsSumToZero,

    #[error("Gram size {value} is out of range [1, {max}]")]
    InvalidGramSize {
        value: usize,
        max: usize,
    },

    #[error("Actor cannot be empty")]
    EmptyActor,

    #[error("Node id cannot be empty")]
    EmptyNodeId,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Reasons a merge request was rejected.
///
/// Every variant is terminal for the request: the graph is unchanged and the
/// engine never retries on its own.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Invalid merge request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Node not found: {id}")]
    NotFound {
        id: NodeId,
    },

    #[error("Cannot merge node {id} into itself")]
    SelfMergeNotAllowed {
        id: NodeId,
    },

    #[error("Type mismatch: source is {source_type}, target is {target_type}")]
    TypeMismatch {
        source_type: EntityType,
        target_type: EntityType,
    },

    #[error("Node {id} was already merged into {into}")]
    AlreadyMerged {
        id: NodeId,
        into: NodeId,
    },

    #[error("Concurrency error: {message}")]
    Concurrency {
        message: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl MergeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Maps the variant onto the crate-wide error taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::SelfMergeNotAllowed { .. }
            | Self::TypeMismatch { .. }
            | Self::AlreadyMerged { .. } => ErrorKind::Conflict,
            Self::Concurrency { .. } => ErrorKind::Concurrency,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the id named in the request is no longer independently
    /// addressable, either because it never existed or because it was absorbed.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::AlreadyMerged { .. })
    }

    /// Returns true if repeating the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl From<StorageError> for MergeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NodeNotFound(id) => Self::NotFound { id },
            StorageError::LockTimeout { .. } => Self::Concurrency {
                message: err.to_string(),
            },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

/// Top-level error type for the resolution engine.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scan cancelled after {buckets_scanned} buckets")]
    Cancelled {
        buckets_scanned: usize,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ResolveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Maps the error onto the crate-wide taxonomy.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Merge(e) => e.kind(),
            Self::Storage(e) => e.kind(),
            Self::Cancelled { .. } => ErrorKind::Concurrency,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation)
    }

    /// Returns true if the scan was cancelled by the caller.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Merge(e) => e.is_retryable(),
            Self::Storage(e) => matches!(e, StorageError::LockTimeout { .. }),
            Self::Cancelled { .. } => true,
        }
    }
}

/// Result type alias for resolution operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_threshold() {
        let err = ValidationError::ThresholdOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_merge_error_kinds() {
        let id = NodeId::from("n-1");
        assert_eq!(
            MergeError::NotFound { id: id.clone() }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            MergeError::SelfMergeNotAllowed { id: id.clone() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            MergeError::TypeMismatch {
                source_type: EntityType::Person,
                target_type: EntityType::Location,
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            MergeError::AlreadyMerged {
                id: id.clone(),
                into: NodeId::from("n-2"),
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            MergeError::Concurrency { message: "busy".to_string() }.kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(MergeError::internal("boom").kind(), ErrorKind::Internal);
        assert_eq!(
            MergeError::from(ValidationError::EmptyActor).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_already_merged_is_not_addressable() {
        let err = MergeError::AlreadyMerged {
            id: NodeId::from("2"),
            into: NodeId::from("1"),
        };
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("already merged into 1"));
    }

    #[test]
    fn test_storage_error_maps_to_merge_error() {
        let err: MergeError = StorageError::NodeNotFound(NodeId::from("x")).into();
        assert!(matches!(err, MergeError::NotFound { .. }));

        let err: MergeError = StorageError::LockTimeout { waited_ms: 10 }.into();
        assert!(err.is_retryable());

        let err: MergeError = StorageError::BackendError("disk full".to_string()).into();
        assert!(matches!(err, MergeError::Internal { ref message } if message.contains("disk full")));
    }

    #[test]
    fn test_resolve_error_from_validation() {
        let err: ResolveError = ValidationError::WeightsSumToZero.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_resolve_error_cancelled() {
        let err = ResolveError::Cancelled { buckets_scanned: 3 };
        assert!(err.is_cancelled());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("3 buckets"));
    }

    #[test]
    fn test_resolve_error_internal() {
        let err = ResolveError::internal("unexpected state");
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("unexpected state"));
    }
}
