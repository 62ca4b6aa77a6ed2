//! The error-carrying half of a deferred's result.

use core::fmt;
use std::any::Any;
use std::error::Error;
use std::rc::Rc;

/// An error flowing through a deferred chain.
///
/// A `Failure` wraps any [`std::error::Error`] behind an `Rc` so it can be
/// recorded by a result sink, stored in a combinator slot and passed down the
/// chain without requiring the error itself to be `Clone`. Use
/// [`check`](Self::check) to recover the concrete error type, the way an
/// errback inspects what it was handed.
#[derive(Clone)]
pub struct Failure {
    error: Rc<dyn Error + 'static>,
}

impl Failure {
    /// Wraps an error.
    #[must_use]
    pub fn new<E: Error + 'static>(error: E) -> Self {
        Self {
            error: Rc::new(error),
        }
    }

    /// Creates a failure carrying only a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// Converts a caught panic payload into a failure.
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(PanicError::from_payload(payload.as_ref()))
    }

    /// Returns the wrapped error if it is an `E`.
    #[must_use]
    pub fn check<E: Error + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// Returns true if the wrapped error is an `E`.
    #[must_use]
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    /// Returns the wrapped error.
    #[must_use]
    pub fn error(&self) -> &(dyn Error + 'static) {
        self.error.as_ref()
    }

    /// Returns true if both failures share the same underlying error.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.error, &other.error)
    }
}

impl<E: Error + 'static> From<E> for Failure {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Failure").field(&self.error).finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failure: {}", self.error)
    }
}

/// A plain message error, used by [`Failure::msg`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct MessageError(String);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for MessageError {}

/// A panic caught while running a handler or test body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    /// Creates a panic error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
