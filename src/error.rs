//! Contains the `Error` and `Result` types that `crowd-stream` uses.

use std::sync::Arc;

use thiserror::Error;

/// The result type for all fallible operations in the `crowd-stream` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while streaming from the platform. The inner
/// [`ErrorKind`] is boxed to keep the type small on the happy path, and all
/// sources are reference-counted so errors can be cloned into aggregates.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        ErrorKind::Timeout {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn aggregate(errors: Vec<Error>) -> Self {
        ErrorKind::Aggregate { errors }.into()
    }

    /// Creates a fetch error. Intended for [`RemoteClient`](crate::client::RemoteClient)
    /// implementations surfacing a failed platform call.
    pub fn fetch(message: impl Into<String>) -> Self {
        ErrorKind::Fetch {
            message: message.into(),
        }
        .into()
    }

    /// Creates a storage error. Intended for [`Storage`](crate::storage::Storage)
    /// implementations surfacing a failed load or save.
    pub fn storage(message: impl Into<String>) -> Self {
        ErrorKind::Storage {
            message: message.into(),
        }
        .into()
    }

    /// The underlying errors if this is an aggregate raised by the pipeline.
    pub fn aggregated(&self) -> Option<&[Error]> {
        match self.kind.as_ref() {
            ErrorKind::Aggregate { errors } => Some(errors),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorKind::Serialization(Arc::new(error)))
    }
}

/// The types of errors that can occur.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A component was constructed or invoked with an invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// A description of what made the argument invalid.
        message: String,
    },

    /// A platform call failed. Propagated unchanged from the client through
    /// cursors and observers up to the pipeline.
    #[error("fetch error: {message}")]
    Fetch {
        /// A description of the failure.
        message: String,
    },

    /// A checkpoint load or save failed. Fatal to the pipeline; cleanup
    /// failures on shutdown are logged and swallowed instead.
    #[error("storage error: {message}")]
    Storage {
        /// A description of the failure.
        message: String,
    },

    /// A long-poll helper exceeded its deadline.
    #[error("timed out: {message}")]
    Timeout {
        /// A description of what was being waited on.
        message: String,
    },

    /// One or more observer tasks failed within a single pipeline iteration.
    #[error("{} observer task(s) failed", .errors.len())]
    Aggregate {
        /// Every error produced in the iteration.
        errors: Vec<Error>,
    },

    /// An observer snapshot could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(Arc<serde_json::Error>),

    /// An unexpected internal condition.
    #[error("internal error: {message}")]
    Internal {
        /// A description of the condition.
        message: String,
    },
}
