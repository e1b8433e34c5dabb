#![forbid(unsafe_code)]

//! Reactive value cells with change-gated, replay-on-subscribe notification.
//!
//! # Design
//!
//! [`Signal<T>`] wraps a value, an equality predicate and a readiness
//! predicate in shared, reference-counted storage. `set` swaps the value only
//! when the equality predicate says it differs, then drains the subscriber set
//! synchronously.
//!
//! # Invariants
//!
//! 1. A notification pass runs iff `!equals(old, new)`; otherwise `set` is a
//!    no-op (no version bump, no delivery).
//! 2. Subscribers are notified in registration order.
//! 3. `subscribe` on a ready signal delivers the current value before the
//!    handler is registered, so it precedes any `set`-triggered delivery.
//! 4. Each delivery reads the value current at that moment: after a nested
//!    `set` inside a subscriber, the remaining subscribers of the outer pass
//!    see the newer value.
//!
//! # Failure Modes
//!
//! - **Subscriber fails**: `set` returns [`ListenerError`]; subscribers after
//!   the failing one are not visited for that pass. The new value stays.
//! - **Unbounded re-entrancy**: a subscriber that keeps calling `set` with
//!   distinct values recurses. Nesting deeper than [`NOTIFY_DEPTH_WARNING`]
//!   logs a warning; it is not prevented.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::error::{HandlerResult, ListenerError};
use crate::handlers::{Handler, HandlerSet, Subscription, drain};
use crate::subscribable::Subscribable;

/// Channel name reported by listener errors raised from a signal.
pub const SIGNAL_CHANNEL: &str = "signal";

/// Nested notify depth at which a warning is logged.
pub const NOTIFY_DEPTH_WARNING: u32 = 32;

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;
type ReadyFn<T> = Box<dyn Fn(&T) -> bool>;

struct SignalState<T> {
    value: T,
    version: u64,
    subscribers: HandlerSet<T>,
}

struct SignalShared<T> {
    state: RefCell<SignalState<T>>,
    equals: Equality<T>,
    is_ready: ReadyFn<T>,
    depth: Cell<u32>,
}

/// A shared reactive value cell.
///
/// Cloning a `Signal` creates a new handle to the **same** cell.
pub struct Signal<T> {
    shared: Rc<SignalShared<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("Signal")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Strict (`PartialEq`) equality, always ready.
    pub fn new(value: T) -> Self {
        Self::builder(value).build()
    }

    pub fn builder(value: T) -> SignalBuilder<T> {
        SignalBuilder {
            value,
            equals: Box::new(|a: &T, b: &T| a == b),
            is_ready: Box::new(|_: &T| true),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Signal<Option<T>> {
    /// A signal that counts as ready only while it holds `Some`.
    pub fn optional(value: Option<T>) -> Self {
        Self::builder(value).ready_when(Option::is_some).build()
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// A signal for types without `PartialEq`, gated by `equals`.
    pub fn with_equality(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::from_parts(value, Box::new(equals), Box::new(|_: &T| true))
    }

    fn from_parts(value: T, equals: Equality<T>, is_ready: ReadyFn<T>) -> Self {
        // Nothing can be subscribed yet, so the constructor's ready
        // notification has no audience.
        Self {
            shared: Rc::new(SignalShared {
                state: RefCell::new(SignalState {
                    value,
                    version: 0,
                    subscribers: HandlerSet::default(),
                }),
                equals,
                is_ready,
                depth: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn get(&self) -> T {
        self.shared.state.borrow().value.clone()
    }

    /// Access the current value by reference.
    ///
    /// # Panics
    ///
    /// Panics if `f` calls `set` on the same signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.state.borrow().value)
    }

    /// Store `value` and notify if it differs from the current one.
    ///
    /// Returns `Ok(true)` when the value changed.
    pub fn set(&self, value: T) -> Result<bool, ListenerError> {
        {
            let mut state = self.shared.state.borrow_mut();
            if (self.shared.equals)(&state.value, &value) {
                return Ok(false);
            }
            state.value = value;
            state.version += 1;
        }
        self.notify()?;
        Ok(true)
    }

    /// Set the value computed from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<bool, ListenerError> {
        let next = self.with(f);
        self.set(next)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.with(|value| (self.shared.is_ready)(value))
    }

    /// Number of value changes since construction.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.state.borrow().version
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.borrow().subscribers.len()
    }

    /// Register `f`; delivers the current value first when ready.
    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> Subscription {
        if let Some(current) = self.ready_value() {
            f(&current);
        }
        self.attach(Rc::new(move |value: &T| -> HandlerResult {
            f(value);
            Ok(())
        }))
    }

    /// Fallible variant of [`subscribe`](Self::subscribe).
    ///
    /// A failing replay is reported and leaves `f` unregistered.
    pub fn try_subscribe(
        &self,
        f: impl Fn(&T) -> HandlerResult + 'static,
    ) -> Result<Subscription, ListenerError> {
        self.subscribe_with(Rc::new(f))
    }

    fn ready_value(&self) -> Option<T> {
        let state = self.shared.state.borrow();
        (self.shared.is_ready)(&state.value).then(|| state.value.clone())
    }

    fn attach(&self, handler: Handler<T>) -> Subscription {
        let id = self.shared.state.borrow_mut().subscribers.insert(handler);
        let weak: Weak<SignalShared<T>> = Rc::downgrade(&self.shared);
        Subscription::new(id, move || {
            if let Some(shared) = weak.upgrade() {
                shared.state.borrow_mut().subscribers.remove(id);
            }
        })
    }

    fn notify(&self) -> Result<(), ListenerError> {
        let depth = self.shared.depth.get() + 1;
        self.shared.depth.set(depth);
        if depth == NOTIFY_DEPTH_WARNING {
            warn!(depth, "signal.notify re-entered too deeply");
        }

        let result = drain(
            |cursor| self.shared.state.borrow().subscribers.next_after(cursor),
            |handler| {
                let current = self.get();
                handler(&current)
            },
        );
        self.shared.depth.set(depth - 1);

        let delivered = result.map_err(|source| ListenerError::new(SIGNAL_CHANNEL, source))?;
        trace!(delivered, depth, "signal.notify");
        Ok(())
    }
}

impl<T: Clone + 'static> Subscribable<T> for Signal<T> {
    fn subscribe_with(&self, handler: Handler<T>) -> Result<Subscription, ListenerError> {
        if let Some(current) = self.ready_value() {
            handler(&current).map_err(|source| ListenerError::new(SIGNAL_CHANNEL, source))?;
        }
        Ok(self.attach(handler))
    }
}

/// Configures equality and readiness before building a [`Signal`].
pub struct SignalBuilder<T> {
    value: T,
    equals: Equality<T>,
    is_ready: ReadyFn<T>,
}

impl<T: Clone + 'static> SignalBuilder<T> {
    /// Replace the default `PartialEq` gate.
    #[must_use]
    pub fn equals(mut self, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equals = Box::new(equals);
        self
    }

    /// Replace the default "always ready" predicate.
    #[must_use]
    pub fn ready_when(mut self, is_ready: impl Fn(&T) -> bool + 'static) -> Self {
        self.is_ready = Box::new(is_ready);
        self
    }

    pub fn build(self) -> Signal<T> {
        Signal::from_parts(self.value, self.equals, self.is_ready)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<T: Clone + 'static>(signal: &Signal<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let sub = signal.subscribe(move |v| seen_clone.borrow_mut().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn get_set_basic() {
        let signal = Signal::new(42);
        assert_eq!(signal.get(), 42);
        assert_eq!(signal.version(), 0);

        assert!(signal.set(7).unwrap());
        assert_eq!(signal.get(), 7);
        assert_eq!(signal.version(), 1);
    }

    #[test]
    fn equal_set_is_noop() {
        let signal = Signal::new(1);
        let (seen, _sub) = collect(&signal);
        seen.borrow_mut().clear();

        assert!(!signal.set(1).unwrap());
        assert!(seen.borrow().is_empty());
        assert_eq!(signal.version(), 0);
    }

    #[test]
    fn subscribe_replays_current_value_first() {
        let signal = Signal::new("a".to_string());
        let (seen, _sub) = collect(&signal);
        signal.set("b".to_string()).unwrap();
        assert_eq!(*seen.borrow(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn optional_signal_skips_replay_when_none() {
        let signal = Signal::optional(None::<u8>);
        let (seen, _sub) = collect(&signal);
        assert!(seen.borrow().is_empty());
        assert!(!signal.is_ready());

        signal.set(Some(3)).unwrap();
        assert_eq!(*seen.borrow(), vec![Some(3)]);
    }

    #[test]
    fn notification_order_is_registration_order() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut subs = Vec::new();
        for tag in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            subs.push(signal.subscribe(move |_| log.borrow_mut().push(tag)));
        }
        log.borrow_mut().clear();

        signal.set(1).unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_stops_delivery_and_is_idempotent() {
        let signal = Signal::new(0);
        let (seen, sub) = collect(&signal);
        sub.unsubscribe();
        sub.unsubscribe();
        signal.set(5).unwrap();
        assert_eq!(*seen.borrow(), vec![0]);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let signal = Signal::new(0);
        {
            let _sub = signal.subscribe(|_| {});
            assert_eq!(signal.subscriber_count(), 1);
        }
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn custom_equality_coalesces() {
        let signal = Signal::builder(10_i32)
            .equals(|a, b| a / 10 == b / 10)
            .build();
        let (seen, _sub) = collect(&signal);

        assert!(!signal.set(15).unwrap());
        assert!(signal.set(20).unwrap());
        assert_eq!(*seen.borrow(), vec![10, 20]);
    }

    #[test]
    fn with_equality_for_non_partial_eq_types() {
        #[derive(Clone)]
        struct Opaque(u32);
        let signal = Signal::with_equality(Opaque(1), |a, b| a.0 == b.0);
        assert!(!signal.set(Opaque(1)).unwrap());
        assert!(signal.set(Opaque(2)).unwrap());
        assert_eq!(signal.with(|v| v.0), 2);
    }

    #[test]
    fn nested_set_completes_before_outer_returns() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let inner = signal.clone();
        let log_a = Rc::clone(&log);
        let _a = signal.subscribe(move |v| {
            log_a.borrow_mut().push(("a", *v));
            if *v == 1 {
                inner.set(2).unwrap();
            }
        });
        let log_b = Rc::clone(&log);
        let _b = signal.subscribe(move |v| log_b.borrow_mut().push(("b", *v)));
        log.borrow_mut().clear();

        signal.set(1).unwrap();
        // Nested pass for 2 runs fully inside a's delivery of 1; b's outer
        // delivery then reads the current value.
        assert_eq!(
            *log.borrow(),
            vec![("a", 1), ("a", 2), ("b", 2), ("b", 2)]
        );
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn failing_subscriber_aborts_remaining_deliveries() {
        let signal = Signal::new(0);
        let _fail = signal
            .try_subscribe(|v| if *v > 0 { Err("rejected".into()) } else { Ok(()) })
            .unwrap();
        let (seen, _sub) = collect(&signal);
        seen.borrow_mut().clear();

        let err = signal.set(1).unwrap_err();
        assert_eq!(err.channel(), SIGNAL_CHANNEL);
        assert_eq!(err.root_cause().to_string(), "rejected");
        assert!(seen.borrow().is_empty());
        // The value was still stored.
        assert_eq!(signal.get(), 1);
    }

    #[test]
    fn failing_replay_leaves_handler_unregistered() {
        let signal = Signal::new(1);
        let result = signal.try_subscribe(|_| Err("no".into()));
        assert!(result.is_err());
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_added_during_notify_is_visited() {
        let signal = Signal::new(0);
        let late_hits = Rc::new(Cell::new(0));
        let holder: Rc<RefCell<Vec<Subscription>>> = Rc::default();

        let sig = signal.clone();
        let hits = Rc::clone(&late_hits);
        let holder_clone = Rc::clone(&holder);
        let _adder = signal.subscribe(move |v| {
            if *v == 1 && holder_clone.borrow().is_empty() {
                let hits = Rc::clone(&hits);
                let sub = sig.subscribe(move |_| hits.set(hits.get() + 1));
                holder_clone.borrow_mut().push(sub);
            }
        });

        signal.set(1).unwrap();
        // One replay on subscribe plus one visit in the live pass.
        assert_eq!(late_hits.get(), 2);
    }

    #[test]
    fn update_applies_function() {
        let signal = Signal::new(3);
        signal.update(|v| v * 2).unwrap();
        assert_eq!(signal.get(), 6);
    }

    #[test]
    fn clone_shares_state() {
        let a = Signal::new(1);
        let b = a.clone();
        a.set(9).unwrap();
        assert_eq!(b.get(), 9);
    }

    #[test]
    fn debug_format() {
        let signal = Signal::new(42);
        let dbg = format!("{signal:?}");
        assert!(dbg.contains("Signal"));
        assert!(dbg.contains("42"));
    }
}
