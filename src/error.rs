use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by sessions, the interceptor chain and the normalization
/// service.
///
/// Every variant reaches the caller unchanged: sessions perform no recovery
/// and the dispatcher never retries.
#[derive(Debug, Error)]
pub enum Error {
    /// A request was missing a required field at construction time.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request
        message: String,
    },

    /// Distinguished name text could not be parsed.
    #[error("invalid DN '{input}': {reason}")]
    InvalidDn {
        /// The text that failed to parse
        input: String,
        /// Why parsing failed
        reason: String,
    },

    /// The schema registry has no attribute type for this identifier.
    #[error("unknown attribute type: {id}")]
    UnknownAttributeType {
        /// The short name or OID that failed to resolve
        id: String,
    },

    /// A byte/text conversion failed during normalization.
    #[error("encoding error: {message}")]
    Encoding {
        /// Description of the conversion failure
        message: String,
    },

    /// An interceptor stage rejected the operation.
    #[error("operation rejected by '{stage}': {reason}")]
    StageAbort {
        /// Name of the rejecting stage
        stage: String,
        /// Stage-supplied reason
        reason: String,
    },

    /// Opaque failure from the storage backend, passed through verbatim.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A size or time limit was reached while iterating results.
    #[error("{0} exceeded")]
    LimitExceeded(Limit),

    /// A wire frame could not be decoded.
    #[error("frame error: {message}")]
    Frame {
        /// Description of the framing failure
        message: String,
    },

    /// Service, chain or schema configuration is unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem
        message: String,
    },

    /// The dispatcher produced a result shape that does not fit the operation.
    #[error("{operation} produced an unexpected {outcome} result")]
    UnexpectedOutcome {
        /// Label of the dispatched operation
        operation: &'static str,
        /// Label of the result that came back
        outcome: &'static str,
    },
}

impl Error {
    /// Creates an `InvalidRequest` error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an `UnknownAttributeType` error.
    pub fn unknown_attribute(id: impl Into<String>) -> Self {
        Self::UnknownAttributeType { id: id.into() }
    }

    /// Creates an `Encoding` error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Creates a `StageAbort` error on behalf of the named stage.
    pub fn abort(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageAbort {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a `Frame` error.
    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    /// Short label for the error kind, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid-request",
            Self::InvalidDn { .. } => "invalid-dn",
            Self::UnknownAttributeType { .. } => "unknown-attribute-type",
            Self::Encoding { .. } => "encoding-error",
            Self::StageAbort { .. } => "stage-abort",
            Self::Backend(_) => "backend-error",
            Self::LimitExceeded(_) => "limit-exceeded",
            Self::Frame { .. } => "frame-error",
            Self::Configuration { .. } => "configuration-error",
            Self::UnexpectedOutcome { .. } => "unexpected-outcome",
        }
    }
}

/// Which result limit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// The configured maximum number of entries
    Size(usize),
    /// The configured maximum iteration time
    Time(Duration),
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Size(n) => write!(f, "size limit of {} entries", n),
            Limit::Time(d) => write!(f, "time limit of {}ms", d.as_millis()),
        }
    }
}

/// Failure reported by a storage backend.
///
/// # Examples
///
/// ```
/// use directory_core::{BackendError, BackendErrorKind};
///
/// let error = BackendError::new(BackendErrorKind::NoSuchObject, "cn=missing,o=acme");
/// assert_eq!(error.kind(), BackendErrorKind::NoSuchObject);
/// assert_eq!(error.to_string(), "backend error (no such object): cn=missing,o=acme");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl BackendError {
    /// Creates a new backend error.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend error ({}): {}", self.kind, self.message)
    }
}

impl std::error::Error for BackendError {}

/// Kind of backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The target entry does not exist.
    NoSuchObject,
    /// An entry with the same name already exists.
    EntryAlreadyExists,
    /// The operation requires a leaf entry.
    NotAllowedOnNonLeaf,
    /// The backend cannot serve requests right now.
    Unavailable,
    /// Anything else.
    Other,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchObject => write!(f, "no such object"),
            Self::EntryAlreadyExists => write!(f, "entry already exists"),
            Self::NotAllowedOnNonLeaf => write!(f, "not allowed on non-leaf"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_passes_through_display() {
        let err: Error = BackendError::new(BackendErrorKind::Unavailable, "disk offline").into();
        assert_eq!(err.to_string(), "backend error (unavailable): disk offline");
        assert_eq!(err.kind(), "backend-error");
    }

    #[test]
    fn stage_abort_names_stage() {
        let err = Error::abort("access-control", "insufficient access rights");
        assert_eq!(
            err.to_string(),
            "operation rejected by 'access-control': insufficient access rights"
        );
    }

    #[test]
    fn limit_display() {
        let err = Error::LimitExceeded(Limit::Size(5));
        assert_eq!(err.to_string(), "size limit of 5 entries exceeded");
        let err = Error::LimitExceeded(Limit::Time(Duration::from_millis(250)));
        assert_eq!(err.to_string(), "time limit of 250ms exceeded");
    }
}
