#![forbid(unsafe_code)]

//! One subscribe capability shared by signals, streams and emitter channels.
//!
//! Consumers that only need "call me with every value" take
//! `impl Subscribable<T>` instead of probing for a particular source type.

use std::rc::Rc;

use crate::error::{HandlerResult, ListenerError};
use crate::handlers::{Handler, Subscription};

pub trait Subscribable<T> {
    /// Register `handler`.
    ///
    /// Sources with a replayable current value deliver it before
    /// registering; if that delivery fails the handler is not registered
    /// and the error is returned.
    fn subscribe_with(&self, handler: Handler<T>) -> Result<Subscription, ListenerError>;
}

/// Convenience methods over any [`Subscribable`].
pub trait SubscribableExt<T>: Subscribable<T> {
    /// Register a fallible closure.
    fn listen(
        &self,
        f: impl Fn(&T) -> HandlerResult + 'static,
    ) -> Result<Subscription, ListenerError> {
        self.subscribe_with(Rc::new(f))
    }
}

impl<T, S: Subscribable<T> + ?Sized> SubscribableExt<T> for S {}

impl<T, S: Subscribable<T> + ?Sized> Subscribable<T> for Box<S> {
    fn subscribe_with(&self, handler: Handler<T>) -> Result<Subscription, ListenerError> {
        (**self).subscribe_with(handler)
    }
}

impl<T, S: Subscribable<T> + ?Sized> Subscribable<T> for Rc<S> {
    fn subscribe_with(&self, handler: Handler<T>) -> Result<Subscription, ListenerError> {
        (**self).subscribe_with(handler)
    }
}
