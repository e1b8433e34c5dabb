#![forbid(unsafe_code)]

//! Named multi-channel publish/subscribe with a per-id replay cache.
//!
//! # Design
//!
//! An [`Emitter<P>`] maps event names to ordered handler sets. Delivery is
//! synchronous and follows the live-iteration rules of
//! [`handlers`](crate::handlers): handlers added mid-delivery are visited,
//! handlers removed before their turn are skipped.
//!
//! Payloads that carry an id ([`Payload::payload_id`]) are remembered under
//! `event#id` when emitted, so late callers of [`Emitter::until`] can pick the
//! last one up without waiting.
//!
//! # Invariants
//!
//! 1. `emit` on a channel with no handlers is a no-op, never an error.
//! 2. The replay cache holds at most one payload per `(event, id)`.
//! 3. `one` handlers are removed before they run, so a re-entrant emit on the
//!    same channel does not reach them again.
//! 4. `terminate()` runs every disposer exactly once, then drops every
//!    channel. The replay cache survives.
//!
//! # Failure Modes
//!
//! - **Handler fails**: `emit` returns [`ListenerError`] naming the channel;
//!   handlers after the failing one are not visited for that emit.
//! - **Unmatched `wait_for`**: the listener lives as long as the returned
//!   [`Waiter`]. Keep it bounded with `deferred_emit` or drop it.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use crate::error::{HandlerResult, ListenerError};
use crate::handlers::{Disposer, Handler, HandlerId, HandlerSet, Subscription, drain};
use crate::subscribable::Subscribable;
use crate::waiter::Waiter;

/// Conventional success channel used by [`Emitter::to_future`].
pub const OUTPUT_EVENT: &str = "output";

/// Channel that rejects [`Emitter::once`] and [`Emitter::to_future`].
pub const ERROR_EVENT: &str = "error";

static NEXT_EMITTER_ID: AtomicU64 = AtomicU64::new(1);

/// Payload types an [`Emitter`] can cache for replay.
///
/// Return `Some(id)` from [`payload_id`](Self::payload_id) for payloads that
/// identify an entity; those are stored in the replay cache on `emit`.
pub trait Payload: Clone + 'static {
    fn payload_id(&self) -> Option<String> {
        None
    }
}

macro_rules! anonymous_payload {
    ($($ty:ty),* $(,)?) => {
        $(impl Payload for $ty {})*
    };
}

anonymous_payload!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: Clone + 'static> Payload for Vec<T> {}

impl<K: Clone + 'static, V: Clone + 'static> Payload for BTreeMap<K, V> {}

impl<A: Clone + 'static, B: Clone + 'static> Payload for (A, B) {}

impl<T: Payload> Payload for Option<T> {
    fn payload_id(&self) -> Option<String> {
        self.as_ref().and_then(Payload::payload_id)
    }
}

fn replay_key(event: &str, id: &str) -> String {
    format!("{event}#{id}")
}

struct EmitterState<P> {
    channels: HashMap<String, HandlerSet<P>>,
    replay: HashMap<String, P>,
    disposers: Vec<Disposer>,
}

struct EmitterShared<P> {
    id: u64,
    state: RefCell<EmitterState<P>>,
}

impl<P> EmitterShared<P> {
    fn remove_handler(&self, event: &str, id: HandlerId) -> bool {
        self.state
            .borrow_mut()
            .channels
            .get_mut(event)
            .is_some_and(|channel| channel.remove(id))
    }
}

/// A named multi-channel publish/subscribe hub.
///
/// Cloning an `Emitter` creates a new handle to the **same** channels.
pub struct Emitter<P> {
    shared: Rc<EmitterShared<P>>,
}

impl<P> Clone for Emitter<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<P> fmt::Debug for Emitter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        let mut channels: Vec<(&str, usize)> = state
            .channels
            .iter()
            .map(|(name, set)| (name.as_str(), set.len()))
            .collect();
        channels.sort_unstable();
        f.debug_struct("Emitter")
            .field("id", &self.shared.id)
            .field("channels", &channels)
            .field("cached", &state.replay.len())
            .field("disposers", &state.disposers.len())
            .finish()
    }
}

impl<P: Clone + 'static> Default for Emitter<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Clone + 'static> Emitter<P> {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(EmitterShared {
                id: NEXT_EMITTER_ID.fetch_add(1, Ordering::Relaxed),
                state: RefCell::new(EmitterState {
                    channels: HashMap::new(),
                    replay: HashMap::new(),
                    disposers: Vec::new(),
                }),
            }),
        }
    }

    /// Unique identifier for this emitter (for tracing).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn downgrade(&self) -> WeakEmitter<P> {
        WeakEmitter {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Register `f` on `event`.
    pub fn on(&self, event: &str, f: impl Fn(&P) + 'static) -> Subscription {
        self.attach(
            event,
            Rc::new(move |payload: &P| -> HandlerResult {
                f(payload);
                Ok(())
            }),
        )
    }

    /// Register a fallible handler; its error aborts the emit that reached it.
    pub fn try_on(&self, event: &str, f: impl Fn(&P) -> HandlerResult + 'static) -> Subscription {
        self.attach(event, Rc::new(f))
    }

    /// Remove a handler by id. Absent channels and unknown ids are ignored.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        self.shared.remove_handler(event, id)
    }

    /// Deliver the next `event` to `f`, then unregister it.
    pub fn one(&self, event: &str, f: impl FnOnce(&P) + 'static) -> Subscription {
        let pending = RefCell::new(Some(f));
        let own_id = Rc::new(std::cell::Cell::new(None::<HandlerId>));
        let own_id_for_handler = Rc::clone(&own_id);
        let weak = Rc::downgrade(&self.shared);
        let name = event.to_owned();

        let subscription = self.attach(
            event,
            Rc::new(move |payload: &P| -> HandlerResult {
                if let (Some(shared), Some(id)) = (weak.upgrade(), own_id_for_handler.get()) {
                    shared.remove_handler(&name, id);
                }
                let f = pending.borrow_mut().take();
                if let Some(f) = f {
                    f(payload);
                }
                Ok(())
            }),
        );
        own_id.set(subscription.id());
        subscription
    }

    /// Deliver without touching the replay cache.
    ///
    /// Returns the number of handlers that ran.
    pub fn emit_uncached(&self, event: &str, payload: P) -> Result<usize, ListenerError> {
        self.deliver(event, &payload)
    }

    /// Resolve with the first `event` payload accepted by `predicate`.
    pub fn wait_for(&self, event: &str, predicate: impl Fn(&P) -> bool + 'static) -> Waiter<P> {
        let (waiter, resolver) = Waiter::pending();
        let subscription = self.on(event, move |payload| {
            if predicate(payload) {
                resolver.settle(Ok(payload.clone()));
            }
        });
        waiter.hold(subscription);
        waiter
    }

    /// Resolve on the first `event`, reject on the first [`ERROR_EVENT`].
    ///
    /// Both listeners are removed as soon as either fires.
    pub fn once(&self, event: &str) -> Waiter<P> {
        let (waiter, resolver) = Waiter::pending();
        let on_event = Rc::clone(&resolver);
        waiter.hold(self.on(event, move |payload| on_event.settle(Ok(payload.clone()))));
        waiter.hold(self.on(ERROR_EVENT, move |payload| resolver.settle(Err(payload.clone()))));
        waiter
    }

    /// [`once`](Self::once) on the conventional [`OUTPUT_EVENT`] channel.
    pub fn to_future(&self) -> Waiter<P> {
        self.once(OUTPUT_EVENT)
    }

    /// A [`Subscribable`] view of one channel.
    pub fn channel(&self, event: &str) -> Channel<P> {
        Channel {
            emitter: self.clone(),
            event: event.to_owned(),
        }
    }

    /// Register a cleanup to run on [`terminate`](Self::terminate).
    pub fn add_disposer(&self, f: impl FnOnce() + 'static) {
        self.shared
            .state
            .borrow_mut()
            .disposers
            .push(Disposer::new(f));
    }

    /// Keep `subscription` alive until [`terminate`](Self::terminate).
    pub fn own(&self, subscription: Subscription) {
        self.shared
            .state
            .borrow_mut()
            .disposers
            .push(subscription.into_disposer());
    }

    /// Drop one channel's handlers and the channel itself.
    pub fn terminate_channel(&self, event: &str) {
        let removed = self.shared.state.borrow_mut().channels.remove(event);
        if let Some(channel) = removed {
            debug!(emitter = self.shared.id, event, handlers = channel.len(), "emitter.terminate_channel");
            drop(channel);
        }
    }

    /// Run and clear every disposer, then drop every channel.
    pub fn terminate(&self) {
        let disposers = mem::take(&mut self.shared.state.borrow_mut().disposers);
        let disposed = disposers.len();
        for disposer in disposers {
            disposer.dispose();
        }
        let channels = mem::take(&mut self.shared.state.borrow_mut().channels);
        debug!(
            emitter = self.shared.id,
            disposed,
            channels = channels.len(),
            "emitter.terminate"
        );
        drop(channels);
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared
            .state
            .borrow()
            .channels
            .get(event)
            .map_or(0, HandlerSet::len)
    }

    #[must_use]
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    #[must_use]
    pub fn disposer_count(&self) -> usize {
        self.shared.state.borrow().disposers.len()
    }

    fn attach(&self, event: &str, handler: Handler<P>) -> Subscription {
        let id = self
            .shared
            .state
            .borrow_mut()
            .channels
            .entry(event.to_owned())
            .or_default()
            .insert(handler);
        let weak: Weak<EmitterShared<P>> = Rc::downgrade(&self.shared);
        let event = event.to_owned();
        Subscription::new(id, move || {
            if let Some(shared) = weak.upgrade() {
                shared.remove_handler(&event, id);
            }
        })
    }

    fn deliver(&self, event: &str, payload: &P) -> Result<usize, ListenerError> {
        let delivered = drain(
            |cursor| {
                self.shared
                    .state
                    .borrow()
                    .channels
                    .get(event)
                    .and_then(|channel| channel.next_after(cursor))
            },
            |handler| handler(payload),
        )
        .map_err(|source| ListenerError::new(event, source))?;
        trace!(emitter = self.shared.id, event, delivered, "emitter.emit");
        Ok(delivered)
    }
}

impl<P: Payload> Emitter<P> {
    /// Cache `payload` under `event#id` when it has an id, then deliver.
    ///
    /// Returns the number of handlers that ran.
    pub fn emit(&self, event: &str, payload: P) -> Result<usize, ListenerError> {
        if let Some(id) = payload.payload_id() {
            self.shared
                .state
                .borrow_mut()
                .replay
                .insert(replay_key(event, &id), payload.clone());
        }
        self.deliver(event, &payload)
    }

    /// The last payload emitted on `event` with this id, if any.
    #[must_use]
    pub fn cached(&self, event: &str, id: &str) -> Option<P> {
        self.shared
            .state
            .borrow()
            .replay
            .get(&replay_key(event, id))
            .cloned()
    }

    /// Drop a cached payload (e.g. when its entity is deleted).
    pub fn forget_cached(&self, event: &str, id: &str) -> Option<P> {
        self.shared
            .state
            .borrow_mut()
            .replay
            .remove(&replay_key(event, id))
    }

    /// The payload with `id` on `event`: immediately ready when cached,
    /// otherwise resolved by the first matching emit.
    pub fn until(&self, event: &str, id: &str) -> Waiter<P> {
        if let Some(payload) = self.cached(event, id) {
            return Waiter::ready(payload);
        }
        let id = id.to_owned();
        self.wait_for(event, move |payload| {
            payload.payload_id().as_deref() == Some(id.as_str())
        })
    }
}

/// Non-owning handle to an [`Emitter`].
pub struct WeakEmitter<P> {
    shared: Weak<EmitterShared<P>>,
}

impl<P> Clone for WeakEmitter<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<P> WeakEmitter<P> {
    pub fn upgrade(&self) -> Option<Emitter<P>> {
        self.shared.upgrade().map(|shared| Emitter { shared })
    }
}

/// One channel of an emitter, usable wherever a [`Subscribable`] is expected.
#[derive(Clone)]
pub struct Channel<P> {
    emitter: Emitter<P>,
    event: String,
}

impl<P> Channel<P> {
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl<P: Clone + 'static> Subscribable<P> for Channel<P> {
    fn subscribe_with(&self, handler: Handler<P>) -> Result<Subscription, ListenerError> {
        Ok(self.emitter.attach(&self.event, handler))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
