#![forbid(unsafe_code)]

//! Reactive dataflow runtime for patchwire.
//!
//! - [`Signal`]: a shared value cell with change-gated, replay-on-subscribe
//!   notification.
//! - [`Emitter`]: named multi-channel publish/subscribe with a per-id replay
//!   cache, one-shot handlers and [`Waiter`] futures.
//! - [`Stream`]: a single value channel with replay-last, source paths and
//!   the [`operators`] library.
//! - [`Emitter::deferred_emit`]: conditional emission raced against a
//!   deadline ([`race`]).
//! - [`Pipeline`]: owning aggregate for tearing down one branch.
//!
//! # Architecture
//!
//! Everything is single-threaded: shared state lives in `Rc<RefCell<..>>`,
//! and timers run as local tasks on a tokio current-thread runtime inside a
//! [`tokio::task::LocalSet`]. Delivery is synchronous and re-entrant; see
//! [`handlers`] for the live-iteration rules shared by every source.
//!
//! # Invariants
//!
//! 1. Every registration returns a [`Subscription`]; dropping it (or calling
//!    `unsubscribe`) removes the handler exactly once.
//! 2. A failing handler stops delivery and its error reaches the caller of
//!    `set`, `emit` or `emit_value` as a [`ListenerError`].
//! 3. Sources holding a current value ([`Signal`], replaying [`Stream`])
//!    deliver it to a new subscriber before any later value.

pub mod emitter;
pub mod error;
pub mod handlers;
pub mod operators;
pub mod pipeline;
pub mod race;
pub mod signal;
pub mod stream;
pub mod subscribable;
pub mod waiter;

pub use emitter::{Channel, ERROR_EVENT, Emitter, OUTPUT_EVENT, Payload, WeakEmitter};
pub use error::{BoxError, HandlerResult, ListenerError, ReactiveError, Result, WaitError};
pub use handlers::{Disposer, Handler, HandlerId, Subscription};
pub use operators::{EventTarget, Listener, from_emitter, from_event, merge, named_combine_latest};
pub use pipeline::Pipeline;
pub use race::{Expired, RaceOutcome, Readiness, TimeoutNotifier, race};
pub use signal::{Signal, SignalBuilder};
pub use stream::{NodeRef, Stream, StreamNode, VALUE_EVENT, WeakStream};
pub use subscribable::{Subscribable, SubscribableExt};
pub use waiter::Waiter;
