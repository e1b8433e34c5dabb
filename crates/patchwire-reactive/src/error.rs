#![forbid(unsafe_code)]

//! Error taxonomy for the reactive runtime.
//!
//! - [`ListenerError`]: a handler failed while an emit/notify was draining its
//!   subscriber set. Delivery stops at the failing handler and the error goes
//!   back to whoever called `emit`, `set` or `emit_value`.
//! - [`ReactiveError`]: everything a deferred emission can end with, plus the
//!   listener case.
//! - [`WaitError`]: how a [`Waiter`](crate::Waiter) can settle without a
//!   payload.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by fallible handlers and readiness conditions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Return type of a fallible handler.
pub type HandlerResult = std::result::Result<(), BoxError>;

pub type Result<T> = std::result::Result<T, ReactiveError>;

/// A subscriber failed during synchronous delivery.
#[derive(Debug, Error)]
#[error("listener on `{channel}` failed: {source}")]
pub struct ListenerError {
    channel: String,
    #[source]
    source: BoxError,
}

impl ListenerError {
    #[must_use]
    pub fn new(channel: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            channel: channel.into(),
            source: source.into(),
        }
    }

    /// Channel whose delivery was aborted.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Innermost error, unwrapping listener errors nested by chained emits.
    #[must_use]
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        let mut current: &(dyn std::error::Error + 'static) = self.source.as_ref();
        while let Some(nested) = current.downcast_ref::<ListenerError>() {
            current = nested.source.as_ref();
        }
        current
    }

    #[must_use]
    pub fn into_source(self) -> BoxError {
        self.source
    }
}

#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error("readiness test for `{event}` returned neither `Ready` nor a notifier")]
    Configuration { event: String },

    #[error("`{operation}` needs a tokio runtime to schedule timers")]
    NoRuntime { operation: &'static str },

    #[error("`{event}` was not ready within {ttl:?}")]
    Timeout { event: String, ttl: Duration },

    #[error("readiness condition for `{event}` failed: {source}")]
    Condition {
        event: String,
        #[source]
        source: BoxError,
    },

    #[error("readiness notifier for `{event}` signalled an error")]
    Rejected { event: String },

    #[error("notifier for `{event}` was torn down before settling")]
    Closed { event: String },

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

impl ReactiveError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// `Err(NoRuntime)` unless called from within a tokio runtime.
    pub(crate) fn require_runtime(operation: &'static str) -> Result<()> {
        tokio::runtime::Handle::try_current()
            .map(|_| ())
            .map_err(|_| Self::NoRuntime { operation })
    }

    #[must_use]
    pub fn configuration(event: impl Into<String>) -> Self {
        Self::Configuration {
            event: event.into(),
        }
    }
}

/// Why a [`Waiter`](crate::Waiter) settled without the payload it waited for.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError<P> {
    /// The `"error"` channel fired first; carries its payload.
    #[error("`error` event received before the awaited event")]
    Rejected(P),

    /// Every listener was removed (channel or emitter terminated).
    #[error("listener removed before a payload arrived")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_listener_errors() {
        let inner = ListenerError::new("value", "boom");
        let outer = ListenerError::new("value", inner);
        assert_eq!(outer.channel(), "value");
        assert_eq!(outer.root_cause().to_string(), "boom");
    }

    #[test]
    fn listener_error_converts_into_reactive_error() {
        let err: ReactiveError = ListenerError::new("port", "bad").into();
        assert!(matches!(err, ReactiveError::Listener(_)));
        assert!(!err.is_timeout());
        assert_eq!(err.to_string(), "listener on `port` failed: bad");
    }

    #[test]
    fn timeout_message_includes_ttl() {
        let err = ReactiveError::Timeout {
            event: "connection".into(),
            ttl: Duration::from_millis(50),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("50ms"));
    }
}
