//! Error types for OData batch reading and writing.
//!
//! Two categories are kept apart:
//!
//! | Category | Type | Raised for |
//! |----------|------|------------|
//! | Protocol | [`BatchError`] | Wire syntax, Content-ID / dependsOn rules, quotas, I/O |
//! | Usage | [`UsageError`] | Calling the reader or writer API in the wrong order |
//!
//! Usage errors travel inside [`BatchError::Usage`] so every fallible call
//! has a single `Result` type, and [`BatchError::is_usage_error`] tells the
//! two categories apart.
//!
//! Error messages are part of the contract: each variant renders the
//! offending ids verbatim so callers (and tests) can match on them.
//!
//! # Examples
//!
//! ```
//! use odata_batch::BatchError;
//!
//! let err = BatchError::DuplicateContentId("1".into());
//! assert!(err.is_protocol_error());
//! assert!(err.to_string().contains("'1'"));
//! ```

use crate::batch::types::{BatchReaderState, MessageKind, WriterState};
use std::io;
use thiserror::Error;

/// Result type for batch operations.
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors raised while reading or writing a batch payload.
///
/// Every error except [`BatchError::Usage`] is fatal for the batch being
/// read, I/O failures and cancellation included: the reader moves to the
/// `Exception` state and refuses further calls.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BatchError {
    /// Wire syntax violation (bad boundary, missing blank line, unbalanced JSON).
    #[error("Malformed batch frame: {0}")]
    MalformedFrame(String),

    /// The declared batch content type is neither `multipart/mixed` nor `application/json`.
    #[error("Unsupported batch content type: {0}")]
    UnsupportedContentType(String),

    /// Two operations in the same scope declared the same Content-ID.
    #[error("Duplicate Content-ID '{0}' is not allowed in a batch")]
    DuplicateContentId(String),

    /// A `dependsOn` entry names an id that was not seen earlier in the batch.
    #[error("The dependsOn id '{depends_on}' of request '{content_id}' was not found among the preceding requests")]
    DependsOnIdNotFound {
        depends_on: String,
        content_id: String,
    },

    /// A `dependsOn` entry names a bare request id that lives inside another atomicity group.
    #[error("The dependsOn request id '{depends_on}' is part of atomicity group '{group_id}'; dependsOn should refer to atomicity group id '{group_id}' instead")]
    DependsOnInAtomicityGroup {
        depends_on: String,
        group_id: String,
    },

    /// A request inside an atomicity group declared a dependency on that same group.
    #[error("Request '{content_id}' is part of atomicity group '{group_id}' and cannot depend on its own atomicity group")]
    DependsOnOwnAtomicityGroup {
        content_id: String,
        group_id: String,
    },

    /// The operation URL references the operation's own Content-ID.
    #[error("URL '{url}' contains self-reference of Content-ID value '{content_id}'")]
    SelfReference { content_id: String, url: String },

    /// The operation URL references a Content-ID that has not been declared yet.
    #[error("URL '{url}' references Content-ID '{content_id}' which is not declared earlier in the batch")]
    ForwardReference { content_id: String, url: String },

    /// A `$<id>` reference in a multipart batch points outside the current changeset.
    #[error("Content ID '{content_id}' referenced by URL '{url}' does not exist in the current changeset")]
    ContentIdNotInChangeset { content_id: String, url: String },

    /// A JSON request URL references an id that is not covered by its `dependsOn` list.
    #[error("Reference id '{reference}' in URL '{url}' was not found in the dependsOn ids of request '{content_id}'")]
    ReferenceNotInDependsOn {
        reference: String,
        url: String,
        content_id: String,
    },

    /// The requests of an atomicity group are not adjacent in the batch.
    #[error("Atomicity group '{0}' is not contiguous: its requests must be adjacent")]
    NonContiguousAtomicityGroup(String),

    /// An atomicity group id collides with a request id.
    #[error("Atomicity group id '{0}' conflicts with an existing request id")]
    GroupIdConflict(String),

    /// A query method such as GET appeared inside a multipart changeset.
    #[error("HTTP method '{0}' is not allowed inside a changeset")]
    InvalidMethodInChangeset(String),

    /// A configured message quota was exceeded.
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// An operation body cannot be represented in the selected wire format.
    #[error("Invalid operation body: {0}")]
    InvalidBody(String),

    /// The body stream was read after the reader advanced past its operation.
    #[error("Body stream was disposed: the reader advanced past this operation")]
    StreamDisposed,

    /// The surrounding task cancelled the batch.
    #[error("Batch processing cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying source or sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed outside the framing layer.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame text was not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The API was called in the wrong order.
    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl BatchError {
    /// Shorthand for [`BatchError::MalformedFrame`].
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        BatchError::MalformedFrame(msg.into())
    }

    /// Returns `true` when the error comes from misusing the API.
    #[inline]
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(self, BatchError::Usage(_))
    }

    /// Returns `true` for wire-format and validation errors.
    ///
    /// These are the errors a batch processor is expected to report back
    /// to the client that sent the payload.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        !matches!(
            self,
            BatchError::Usage(_)
                | BatchError::Io(_)
                | BatchError::Cancelled
                | BatchError::Config(_)
                | BatchError::StreamDisposed
        )
    }
}

/// Misuse of the reader, writer or message API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UsageError {
    #[error("Cannot {action} while the batch reader is in state {state:?}")]
    InvalidReaderState {
        action: &'static str,
        state: BatchReaderState,
    },

    #[error("An operation message was already created for the current operation")]
    MessageAlreadyCreated,

    #[error("Cannot create a {expected:?} message while reading a {actual:?} batch")]
    WrongMessageKind {
        expected: MessageKind,
        actual: MessageKind,
    },

    #[error("The batch reader is in the Exception state after an earlier error")]
    ReaderInException,

    #[error("Invalid batch writer transition: cannot {action} in state {state:?}")]
    InvalidWriterTransition {
        action: &'static str,
        state: WriterState,
    },

    #[error("Changeset group id must not be null or empty")]
    NullGroupId,

    #[error("Invalid changeset group id '{0}': it cannot be used in a multipart boundary")]
    InvalidGroupId(String),

    #[error("Headers cannot be changed after the body stream was requested")]
    HeadersFrozen,

    #[error("The body stream of this operation was already requested")]
    BodyAlreadyRequested,

    #[error("A status code can only be set on response operations")]
    StatusOnRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_classification() {
        let err: BatchError = UsageError::NullGroupId.into();
        assert!(err.is_usage_error());
        assert!(!err.is_protocol_error());
    }

    #[test]
    fn test_protocol_error_classification() {
        let err = BatchError::malformed("missing boundary");
        assert!(err.is_protocol_error());
        assert!(!err.is_usage_error());
    }

    #[test]
    fn test_io_is_not_protocol_error() {
        let err: BatchError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(!err.is_protocol_error());
    }

    #[test]
    fn test_depends_on_not_found_message() {
        let err = BatchError::DependsOnIdNotFound {
            depends_on: "3".into(),
            content_id: "2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'3'"));
        assert!(msg.contains("'2'"));
    }

    #[test]
    fn test_self_reference_message() {
        let err = BatchError::SelfReference {
            content_id: "1".into(),
            url: "$1/Orders".into(),
        };
        assert!(err
            .to_string()
            .contains("contains self-reference of Content-ID value"));
    }

    #[test]
    fn test_atomicity_group_message() {
        let err = BatchError::DependsOnInAtomicityGroup {
            depends_on: "g1r1".into(),
            group_id: "g1".into(),
        };
        assert!(err.to_string().contains("is part of atomicity group 'g1'"));
    }

    #[test]
    fn test_usage_error_display() {
        let err = UsageError::InvalidReaderState {
            action: "create an operation message",
            state: BatchReaderState::Initial,
        };
        assert!(err.to_string().contains("Initial"));
    }
}
