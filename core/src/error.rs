//! Error types shared by every arbor backend.

use thiserror::Error;

use crate::node::NodeId;

/// Convenient result alias used throughout arbor.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors produced while building, rendering, tearing down or hydrating a tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A component failed while rendering or during teardown.
    #[error("{message}")]
    Render {
        /// Human readable description.
        message: String,
        /// The error that was being handled when this one was raised.
        #[source]
        cause: Option<Box<Error>>,
    },
    /// A component definition is unusable.
    #[error("invalid component `{name}`: {reason}")]
    InvalidComponent {
        /// Component name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// An async component reached a synchronous renderer.
    #[error("async component `{name}` can only be rendered on the server")]
    AsyncComponent {
        /// Component name.
        name: String,
    },
    /// A patch payload could not be decoded.
    #[error("malformed patch: {0}")]
    MalformedPatch(String),
    /// An island module could not be loaded.
    #[error("failed to load module `{src}`: {reason}")]
    Module {
        /// Module reference.
        src: String,
        /// Loader supplied reason.
        reason: String,
    },
    /// A patch names a module but no loader was configured.
    #[error("no module loader configured for `{src}`")]
    MissingLoader {
        /// Module reference.
        src: String,
    },
    /// The node handle does not refer to a live node.
    #[error("node {0:?} is not part of the document")]
    StaleNode(NodeId),
    /// The property cannot be assigned on a live node.
    #[error("property `{0}` is read-only")]
    ReadOnlyProperty(String),
}

impl Error {
    /// Creates a render error from a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Render {
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps `self` so that `cause` is reported as its source.
    ///
    /// Used when an error handler fails while handling `cause`.
    #[must_use]
    pub fn chain(self, cause: Self) -> Self {
        match self {
            Self::Render {
                message,
                cause: None,
            } => Self::Render {
                message,
                cause: Some(Box::new(cause)),
            },
            other => Self::Render {
                message: other.to_string(),
                cause: Some(Box::new(cause)),
            },
        }
    }

    /// Returns the error nested under this one, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::Render { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Walks the cause chain down to the first error raised.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut error = self;
        while let Some(cause) = error.cause() {
            error = cause;
        }
        error
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::MalformedPatch(error.to_string())
    }
}
