//! Error types and the value-or-error result carrier.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Errors are cheap to clone so that a forked promise can deliver the
//!   same error to every branch
//! - Panics in user continuations are isolated and converted to
//!   [`ErrorKind::Failed`] errors

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A precondition did not hold, or an operation failed outright.
    Failed,
    /// An underlying I/O operation failed.
    Io,
    /// The requested operation is not implemented.
    Unimplemented,
    /// The system is overloaded and shed this operation.
    Overloaded,
    /// The peer or resource this operation depended on went away.
    Disconnected,
}

impl ErrorKind {
    fn label(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Io => "io",
            Self::Unimplemented => "unimplemented",
            Self::Overloaded => "overloaded",
            Self::Disconnected => "disconnected",
        }
    }
}

/// The error type delivered through promises.
///
/// A broken promise carries exactly one `Error`. Errors are cloneable:
/// fork branches all observe the same underlying error, and the optional
/// source is shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    description: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind and description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            source: None,
        }
    }

    /// Creates a [`ErrorKind::Failed`] error.
    #[must_use]
    pub fn failed(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed, description)
    }

    /// Creates an [`ErrorKind::Io`] error.
    #[must_use]
    pub fn io(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, description)
    }

    /// Creates an [`ErrorKind::Unimplemented`] error.
    #[must_use]
    pub fn unimplemented(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, description)
    }

    /// Creates an [`ErrorKind::Overloaded`] error.
    #[must_use]
    pub fn overloaded(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overloaded, description)
    }

    /// Creates an [`ErrorKind::Disconnected`] error.
    #[must_use]
    pub fn disconnected(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Disconnected, description)
    }

    /// Converts a caught panic payload into an error.
    ///
    /// `&str` and `String` payloads (the ones produced by `panic!` with a
    /// message) are preserved; anything else gets a generic description.
    #[must_use]
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let description = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "continuation panicked".to_string());
        Self::new(ErrorKind::Failed, format!("panic: {description}"))
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns true if this error represents a disconnect.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self.kind, ErrorKind::Disconnected)
    }

    /// Returns true if this error represents overload shedding.
    #[must_use]
    pub const fn is_overloaded(&self) -> bool {
        matches!(self.kind, ErrorKind::Overloaded)
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Prepends context text to the description.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        self.description = format!("{ctx}: {}", self.description);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.description)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// A specialized Result type for promise outcomes.
pub type Result<T> = core::result::Result<T, Error>;

/// A slot that holds either a value, an error, or nothing yet.
///
/// Every promise node delivers its result by writing into one of these.
/// The slot starts empty; after a node's `get` has run, exactly one of the
/// two sides is populated. If both sides arise (a value was produced and a
/// later step failed), the error wins and the value is dropped before the
/// result is observed.
#[derive(Debug)]
pub struct ErrorOr<T> {
    /// The successful value, if one was produced.
    pub value: Option<T>,
    /// The error, if one was produced.
    pub error: Option<Error>,
}

impl<T> ErrorOr<T> {
    /// Creates an empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: None,
            error: None,
        }
    }

    /// Creates a slot holding a value.
    #[must_use]
    pub const fn from_value(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// Creates a slot holding an error.
    #[must_use]
    pub const fn from_error(error: Error) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// Returns true if neither side has been populated.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }

    /// Records an error. The first error wins; later ones are logged and
    /// discarded so that the primary failure is the one observed.
    pub fn add_error(&mut self, error: Error) {
        if let Some(existing) = &self.error {
            tracing::warn!(
                primary = %existing,
                discarded = %error,
                "discarding secondary promise error"
            );
        } else {
            self.error = Some(error);
        }
    }

    /// Consumes the slot, yielding `Err` if an error is present (the error
    /// side wins even when a value was also produced), otherwise `Ok`.
    pub fn into_result(self) -> Result<T> {
        match (self.value, self.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => unreachable!("result slot observed before any result was delivered"),
        }
    }
}

impl<T> Default for ErrorOr<T> {
    fn default() -> Self {
        Self::new()
    }
}
