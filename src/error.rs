//! Error types for the mediation engine.
//!
//! Two families:
//! - `ExchangeError`: failures recorded *on* an exchange while it flows
//!   through a route. Processors never return these; they set them via
//!   `Exchange::set_exception` and complete normally, so any wrapping
//!   error handler can observe and recover them uniformly.
//! - `RouteError`: control-plane failures at the route boundary
//!   (admission, lifecycle, registry), returned to the caller directly.

use thiserror::Error;

/// A failure carried by an exchange.
///
/// Cloneable so multicast branch copies can carry independent failures.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// A processor-level (business) failure.
    #[error("processing failed: {message}")]
    Processing {
        message: String,
        #[source]
        cause: Option<Box<ExchangeError>>,
    },

    /// An asynchronous step exceeded its deadline.
    #[error("step timed out after {waited_ms}ms")]
    SuspendTimeout { waited_ms: u64 },

    /// An error handler exhausted its redelivery attempts.
    #[error("redelivery exhausted after {attempts} attempts: {last}")]
    RedeliveryExhausted {
        attempts: u32,
        #[source]
        last: Box<ExchangeError>,
    },

    /// No router branch matched and the route requires a match.
    #[error("no route matched: {detail}")]
    RoutingFailure { detail: String },
}

impl ExchangeError {
    /// Create a processing failure with just a message.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a cause to a processing failure.
    pub fn with_cause(message: impl Into<String>, cause: ExchangeError) -> Self {
        Self::Processing {
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// The kind of this error, for policy matching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Processing { .. } => ErrorKind::Processing,
            Self::SuspendTimeout { .. } => ErrorKind::SuspendTimeout,
            Self::RedeliveryExhausted { .. } => ErrorKind::RedeliveryExhausted,
            Self::RoutingFailure { .. } => ErrorKind::RoutingFailure,
        }
    }
}

/// Discriminant of `ExchangeError`, used by error handler policy entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Processing,
    SuspendTimeout,
    RedeliveryExhausted,
    RoutingFailure,
}

/// Control-plane errors at the route boundary.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    /// The route is not accepting exchanges in its current state.
    #[error("route '{route_id}' is not running (state: {state})")]
    NotRunning { route_id: String, state: String },

    /// A route with the same id is already registered.
    #[error("route '{route_id}' is already registered")]
    DuplicateRoute { route_id: String },

    /// No route with this id is registered.
    #[error("route '{route_id}' is not registered")]
    UnknownRoute { route_id: String },

    /// A route was removed or shut down while still holding state.
    #[error("route '{route_id}' must be stopped first (state: {state})")]
    NotStopped { route_id: String, state: String },

    /// Graceful stop timed out with exchanges still in flight.
    #[error("route '{route_id}' drain timed out with {abandoned} exchange(s) in flight")]
    DrainTimeout { route_id: String, abandoned: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = ExchangeError::processing("boom");
        assert_eq!(err.kind(), ErrorKind::Processing);

        let err = ExchangeError::SuspendTimeout { waited_ms: 100 };
        assert_eq!(err.kind(), ErrorKind::SuspendTimeout);

        let err = ExchangeError::RedeliveryExhausted {
            attempts: 3,
            last: Box::new(ExchangeError::processing("boom")),
        };
        assert_eq!(err.kind(), ErrorKind::RedeliveryExhausted);
    }

    #[test]
    fn test_cause_chain() {
        let inner = ExchangeError::processing("inner");
        let outer = ExchangeError::with_cause("outer", inner);

        assert!(outer.to_string().contains("outer"));
        let source = std::error::Error::source(&outer).expect("cause present");
        assert!(source.to_string().contains("inner"));
    }
}
