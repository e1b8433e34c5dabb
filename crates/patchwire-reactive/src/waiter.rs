#![forbid(unsafe_code)]

//! Futures bridging emitter channels to `async` code.
//!
//! A [`Waiter`] owns the listeners it registered. They are removed as soon as
//! the waiter settles, and also when the waiter is dropped unsettled, so an
//! abandoned wait does not leave a handler behind.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::WaitError;
use crate::handlers::Subscription;

/// Subscriptions shared between a waiter and the handlers resolving it.
#[derive(Default)]
pub(crate) struct Listeners(RefCell<Vec<Subscription>>);

impl Listeners {
    pub(crate) fn push(&self, subscription: Subscription) {
        self.0.borrow_mut().push(subscription);
    }

    /// Drop every subscription outside of the borrow.
    pub(crate) fn release(&self) {
        let subscriptions = mem::take(&mut *self.0.borrow_mut());
        drop(subscriptions);
    }
}

/// Sending half held by the handlers only.
///
/// When every handler holding it is removed without settling, the sender is
/// dropped and the waiter observes [`WaitError::Closed`].
pub(crate) struct Resolver<P> {
    tx: RefCell<Option<oneshot::Sender<Result<P, P>>>>,
    listeners: Rc<Listeners>,
}

impl<P> Resolver<P> {
    /// Settle once; later calls are ignored. Listeners are released first so
    /// no further delivery reaches them.
    pub(crate) fn settle(&self, outcome: Result<P, P>) {
        let tx = self.tx.borrow_mut().take();
        self.listeners.release();
        if let Some(tx) = tx {
            // The waiter may already be gone; nothing to deliver to then.
            let _ = tx.send(outcome);
        }
    }
}

enum WaiterState<P> {
    Ready(Option<P>),
    Pending {
        rx: oneshot::Receiver<Result<P, P>>,
        listeners: Rc<Listeners>,
    },
}

/// A pending (or already available) payload from an emitter.
#[must_use = "a Waiter does nothing unless awaited, and dropping it removes its listeners"]
pub struct Waiter<P> {
    state: WaiterState<P>,
}

impl<P> Waiter<P> {
    /// A waiter that yields `payload` on first poll.
    pub fn ready(payload: P) -> Self {
        Self {
            state: WaiterState::Ready(Some(payload)),
        }
    }

    pub(crate) fn pending() -> (Self, Rc<Resolver<P>>) {
        let (tx, rx) = oneshot::channel();
        let listeners = Rc::new(Listeners::default());
        let resolver = Rc::new(Resolver {
            tx: RefCell::new(Some(tx)),
            listeners: Rc::clone(&listeners),
        });
        let waiter = Self {
            state: WaiterState::Pending { rx, listeners },
        };
        (waiter, resolver)
    }

    pub(crate) fn hold(&self, subscription: Subscription) {
        if let WaiterState::Pending { listeners, .. } = &self.state {
            listeners.push(subscription);
        }
    }

    /// Whether the payload was available at creation (replay-cache hit).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, WaiterState::Ready(Some(_)))
    }
}

impl<P> Unpin for Waiter<P> {}

impl<P> Future for Waiter<P> {
    type Output = Result<P, WaitError<P>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            WaiterState::Ready(payload) => Poll::Ready(payload.take().ok_or(WaitError::Closed)),
            WaiterState::Pending { rx, listeners } => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(outcome) => {
                    listeners.release();
                    Poll::Ready(match outcome {
                        Ok(Ok(payload)) => Ok(payload),
                        Ok(Err(payload)) => Err(WaitError::Rejected(payload)),
                        Err(oneshot::Canceled) => Err(WaitError::Closed),
                    })
                }
            },
        }
    }
}

impl<P> Drop for Waiter<P> {
    fn drop(&mut self) {
        if let WaiterState::Pending { listeners, .. } = &self.state {
            listeners.release();
        }
    }
}

impl<P> fmt::Debug for Waiter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            WaiterState::Ready(Some(_)) => "ready",
            WaiterState::Ready(None) => "taken",
            WaiterState::Pending { .. } => "pending",
        };
        f.debug_struct("Waiter").field("state", &state).finish()
    }
}
