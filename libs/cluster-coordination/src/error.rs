//! Error types for coordination operations.
//!
//! Every failure of the coordination service is mapped onto one of these
//! variants so callers can tell a slow ensemble from a missing file, an
//! interrupted wait, or a broken cluster convention.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by document parsers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for the cluster-coordination crate.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The session did not become ready within the connect wait bound.
    #[error("session not ready after {waited:?} connecting to '{connect_string}'")]
    ConnectTimeout {
        connect_string: String,
        waited: Duration,
    },

    /// The transport to the ensemble could not be established.
    #[error("can't connect to '{connect_string}': {reason}")]
    ConnectIo {
        connect_string: String,
        reason: String,
    },

    /// Protocol or service-level fault reported by the coordination service.
    #[error("coordination service error during {operation} on '{path}': {reason}")]
    Coordination {
        operation: &'static str,
        path: String,
        reason: String,
    },

    /// A single call exceeded its deadline.
    #[error("{operation} on '{path}' timed out after {after:?}")]
    OperationTimeout {
        operation: &'static str,
        path: String,
        after: Duration,
    },

    /// A blocking wait was interrupted before it completed.
    #[error("{operation} interrupted")]
    Interrupted { operation: &'static str },

    /// The local host address could not be determined.
    #[error("could not determine address of host: {0}")]
    AddressResolution(String),

    /// The collection maps to zero or several bundles.
    #[error(
        "no unique config bundle for collection '{collection}' (candidates: {candidates:?})"
    )]
    AmbiguousOrMissingBundle {
        collection: String,
        candidates: Vec<String>,
    },

    /// The collection path does not exist.
    #[error("collection '{collection}' not found at '{path}'")]
    CollectionNotFound { collection: String, path: String },

    /// The requested path does not exist.
    #[error("no node at '{0}'")]
    NotFound(String),

    /// A path or path segment violates the tree conventions.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The session exists but is not currently connected.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The session was closed; no further operations are valid.
    #[error("session closed")]
    SessionClosed,

    /// A fetched file could not be turned into its typed form.
    #[error("failed to parse '{file}': {source}")]
    Parse {
        file: String,
        #[source]
        source: BoxError,
    },

    /// Configuration error (e.g. missing required fields).
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoordinationError {
    /// Returns true if the addressed node (path or collection) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoordinationError::NotFound(_) | CoordinationError::CollectionNotFound { .. }
        )
    }

    /// Returns true if a wait was interrupted.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CoordinationError::Interrupted { .. })
    }

    /// Returns true for connect or per-call timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectTimeout { .. } | CoordinationError::OperationTimeout { .. }
        )
    }

    /// Returns true for conditions that must abort coordinator startup.
    pub fn is_fatal_startup(&self) -> bool {
        matches!(
            self,
            CoordinationError::ConnectTimeout { .. }
                | CoordinationError::ConnectIo { .. }
                | CoordinationError::AddressResolution(_)
                | CoordinationError::AmbiguousOrMissingBundle { .. }
                | CoordinationError::CollectionNotFound { .. }
        )
    }

    pub(crate) fn coordination(
        operation: &'static str,
        path: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        CoordinationError::Coordination {
            operation,
            path: path.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        CoordinationError::InvalidPath {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = CoordinationError::ConnectTimeout {
            connect_string: "nats://127.0.0.1:4222".into(),
            waited: Duration::from_millis(5000),
        };
        assert!(timeout.is_timeout());
        assert!(timeout.is_fatal_startup());
        assert!(!timeout.is_interrupted());

        let op_timeout = CoordinationError::OperationTimeout {
            operation: "get_data",
            path: "/configs/a/b".into(),
            after: Duration::from_secs(2),
        };
        assert!(op_timeout.is_timeout());
        assert!(!op_timeout.is_fatal_startup());

        let interrupted = CoordinationError::Interrupted {
            operation: "children",
        };
        assert!(interrupted.is_interrupted());
        assert!(!interrupted.is_timeout());

        let missing = CoordinationError::NotFound("/configs/a/b".into());
        assert!(missing.is_not_found());
        assert!(!missing.is_fatal_startup());

        let collection = CoordinationError::CollectionNotFound {
            collection: "films".into(),
            path: "/collections/films".into(),
        };
        assert!(collection.is_not_found());
        assert!(collection.is_fatal_startup());

        let bundle = CoordinationError::AmbiguousOrMissingBundle {
            collection: "films".into(),
            candidates: vec![],
        };
        assert!(bundle.is_fatal_startup());
        assert!(!bundle.is_not_found());

        assert!(!CoordinationError::SessionClosed.is_fatal_startup());
    }

    #[test]
    fn test_error_display() {
        let err = CoordinationError::AmbiguousOrMissingBundle {
            collection: "films".into(),
            candidates: vec!["a".into(), "b".into()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("collection 'films'"));
        assert!(msg.contains("\"a\""));

        let err = CoordinationError::coordination("create", "/hosts/x", "no responders");
        assert_eq!(
            err.to_string(),
            "coordination service error during create on '/hosts/x': no responders"
        );
    }

    #[test]
    fn test_parse_error_source() {
        let err = CoordinationError::Parse {
            file: "schema.xml".into(),
            source: "unexpected eof".into(),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("schema.xml"));
    }
}
