//! Errors returned for requests that flow through the ratelimiter.

use crate::GenericError;
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    time::Duration,
};

/// Failure of a request submitted to the ratelimiter.
#[derive(Debug)]
pub struct Error {
    /// Type of error that occurred.
    pub(crate) kind: ErrorType,
    /// Original error leading up to this one.
    pub(crate) source: Option<GenericError>,
}

impl Error {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<GenericError> {
        self.source
    }

    /// Consume the error, returning the owned error type and the source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (ErrorType, Option<GenericError>) {
        (self.kind, self.source)
    }

    /// Create a new error for a cancelled request.
    pub(crate) const fn cancelled() -> Self {
        Self {
            kind: ErrorType::Cancelled,
            source: None,
        }
    }

    /// Create a new error for a wait that would exceed the configured cap.
    pub(crate) const fn max_delay_exceeded(delay: Duration, global: bool) -> Self {
        Self {
            kind: ErrorType::MaxDelayExceeded { delay, global },
            source: None,
        }
    }

    /// Create a new error wrapping one raised by the executor.
    pub(crate) fn request(source: GenericError) -> Self {
        Self {
            kind: ErrorType::RequestError,
            source: Some(source),
        }
    }

    /// Create a new error for a submission to a ratelimiter that shut down.
    pub(crate) const fn shutdown() -> Self {
        Self {
            kind: ErrorType::Shutdown,
            source: None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ErrorType::Cancelled => f.write_str("request was cancelled"),
            ErrorType::MaxDelayExceeded { delay, global } => {
                f.write_str("refusing to wait ")?;
                Display::fmt(&delay.as_secs_f64(), f)?;
                f.write_str("s for the ")?;
                f.write_str(if *global { "global" } else { "bucket" })?;

                f.write_str(" ratelimit to pass")
            }
            ErrorType::RequestError => f.write_str("sending the request failed"),
            ErrorType::Shutdown => f.write_str("ratelimiter has shut down"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn StdError + 'static))
    }
}

/// Type of [`Error`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorType {
    /// Request's cancellation token fired.
    Cancelled,
    /// Waiting out the ratelimit would exceed the maximum delay.
    ///
    /// The request was refused before any wait; the executor was never
    /// invoked for it.
    MaxDelayExceeded {
        /// How long the request would have had to wait.
        delay: Duration,
        /// Whether the wait was for the global ratelimit.
        global: bool,
    },
    /// Executor failed to perform the request.
    RequestError,
    /// Ratelimiter has shut down and no longer accepts submissions.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorType};
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{error::Error as StdError, fmt::Debug, time::Duration};

    assert_fields!(ErrorType::MaxDelayExceeded: delay, global);
    assert_impl_all!(Error: Debug, Send, StdError, Sync);
    assert_impl_all!(ErrorType: Debug, Send, Sync);

    #[test]
    fn display() {
        let error = Error::max_delay_exceeded(Duration::from_secs(5), false);

        assert_eq!(
            "refusing to wait 5s for the bucket ratelimit to pass",
            error.to_string(),
        );
        assert_eq!("request was cancelled", Error::cancelled().to_string());
        assert_eq!(
            "ratelimiter has shut down",
            Error::shutdown().to_string(),
        );
    }
}
