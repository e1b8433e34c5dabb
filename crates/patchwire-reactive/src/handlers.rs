#![forbid(unsafe_code)]

//! Ordered handler sets, RAII subscriptions and disposers.
//!
//! # Delivery model
//!
//! A [`HandlerSet`] keeps handlers keyed by a process-wide monotonically
//! increasing [`HandlerId`], so key order is insertion order. Delivery walks
//! the set with a cursor and re-reads the set before every step:
//!
//! - a handler inserted during delivery has a larger id than the cursor and is
//!   visited in the same pass;
//! - a handler removed before the cursor reaches it is skipped;
//! - no `RefCell` borrow is held while a handler runs, so handlers may
//!   subscribe, unsubscribe or emit re-entrantly.
//!
//! The first failing handler stops the pass.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BoxError, HandlerResult};

/// Shared, fallible callback stored in a handler set.
pub type Handler<A> = Rc<dyn Fn(&A) -> HandlerResult>;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

pub(crate) struct HandlerSet<A> {
    handlers: BTreeMap<HandlerId, Handler<A>>,
}

impl<A> Default for HandlerSet<A> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<A> HandlerSet<A> {
    pub(crate) fn insert(&mut self, handler: Handler<A>) -> HandlerId {
        let id = HandlerId::next();
        self.handlers.insert(id, handler);
        id
    }

    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    /// First handler registered after `cursor` (or the first one overall).
    pub(crate) fn next_after(&self, cursor: Option<HandlerId>) -> Option<(HandlerId, Handler<A>)> {
        let lower = match cursor {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.handlers
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(id, handler)| (*id, Rc::clone(handler)))
    }
}

/// Drive one delivery pass.
///
/// `next` looks up the handler following the cursor (borrowing whatever owns
/// the set only for the lookup); `call` invokes it. Returns the number of
/// handlers that ran.
pub(crate) fn drain<A>(
    mut next: impl FnMut(Option<HandlerId>) -> Option<(HandlerId, Handler<A>)>,
    mut call: impl FnMut(&Handler<A>) -> HandlerResult,
) -> Result<usize, BoxError> {
    let mut cursor = None;
    let mut delivered = 0;
    while let Some((id, handler)) = next(cursor) {
        cursor = Some(id);
        call(&handler)?;
        delivered += 1;
    }
    Ok(delivered)
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// RAII guard for a registered handler.
///
/// Dropping the guard (or calling [`unsubscribe`](Self::unsubscribe)) removes
/// the handler. Unsubscribing twice is a no-op. Use [`detach`](Self::detach)
/// to leave the handler registered for the lifetime of its owner.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: Option<HandlerId>,
    cancel: Cell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new(id: HandlerId, cancel: impl FnOnce() + 'static) -> Self {
        Self {
            id: Some(id),
            cancel: Cell::new(Some(Box::new(cancel))),
        }
    }

    /// Id of the guarded handler, usable with `Emitter::off`.
    #[must_use]
    pub fn id(&self) -> Option<HandlerId> {
        self.id
    }

    /// Whether the handler is still registered through this guard.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let cancel = self.cancel.take();
        let active = cancel.is_some();
        self.cancel.set(cancel);
        active
    }

    /// Remove the handler. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Give up the guard without removing the handler.
    pub fn detach(self) {
        self.cancel.take();
    }

    /// Same guard, additionally keeping `keep` alive until unsubscribed.
    pub(crate) fn retaining<K: 'static>(self, keep: K) -> Self {
        let id = self.id;
        let inner = self.cancel.take();
        Self {
            id,
            cancel: Cell::new(Some(Box::new(move || {
                if let Some(cancel) = inner {
                    cancel();
                }
                drop(keep);
            }))),
        }
    }

    /// Turn the guard into a [`Disposer`] for an owner's teardown list.
    pub fn into_disposer(self) -> Disposer {
        Disposer::new(move || self.unsubscribe())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Disposer
// ---------------------------------------------------------------------------

/// A registered no-argument cleanup, run once during teardown.
pub struct Disposer(Box<dyn FnOnce()>);

impl Disposer {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn dispose(self) {
        (self.0)();
    }
}

impl From<Subscription> for Disposer {
    fn from(subscription: Subscription) -> Self {
        subscription.into_disposer()
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Disposer")
    }
}
