#![forbid(unsafe_code)]

//! Single-channel value streams with replay-last and source paths.
//!
//! # Design
//!
//! A [`Stream<T>`] is an [`Emitter`] restricted to the [`VALUE_EVENT`]
//! channel, plus an optional pointer to the stream it was derived from.
//! Operators build trees of streams; following `source` pointers from any
//! node leads to the root, which is what [`Stream::path`] returns.
//!
//! Ownership runs downstream-to-upstream: a derived stream holds its source
//! strongly, while the handler it registers on the source only holds it
//! weakly. Dropping the last handle to a tail (and its subscriptions)
//! releases the chain behind it.
//!
//! # Invariants
//!
//! 1. `path()` is `[root, .., self]`.
//! 2. With `replay_last`, a new subscriber first sees the last value (if it
//!    passes `last_value_test`), then every later one.
//! 3. `terminate()` leaves no handler reachable from any node on its path.
//!
//! # Failure Modes
//!
//! - **Shared upstream**: `terminate()` cascades over the whole path, so a
//!   sibling branch hanging off the same root stops receiving too. Use
//!   [`Pipeline`](crate::Pipeline) to tear down one branch only.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::emitter::Emitter;
use crate::error::{HandlerResult, ListenerError};
use crate::handlers::{Handler, Subscription};
use crate::subscribable::Subscribable;

/// The only channel a stream emits on.
pub const VALUE_EVENT: &str = "value";

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Type-erased view of a stream used for paths and teardown.
pub trait StreamNode {
    fn node_id(&self) -> u64;

    fn label(&self) -> &str;

    fn upstream(&self) -> Option<NodeRef>;

    /// Run this node's disposers and drop its handlers. Does not cascade.
    fn dispose(&self);
}

pub type NodeRef = Rc<dyn StreamNode>;

type ValueTest<T> = Box<dyn Fn(&T) -> bool>;

struct StreamCore<T> {
    id: u64,
    label: String,
    emitter: Emitter<T>,
    source: Option<NodeRef>,
    peers: RefCell<Vec<NodeRef>>,
    replay_last: Cell<bool>,
    last_value: RefCell<Option<T>>,
    last_value_test: ValueTest<T>,
}

impl<T: Clone + 'static> StreamNode for StreamCore<T> {
    fn node_id(&self) -> u64 {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn upstream(&self) -> Option<NodeRef> {
        self.source.clone()
    }

    fn dispose(&self) {
        self.emitter.terminate();
    }
}

/// A value stream. Cloning creates another handle to the same stream.
pub struct Stream<T> {
    core: Rc<StreamCore<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.core.id)
            .field("label", &self.core.label)
            .field("replay_last", &self.core.replay_last.get())
            .field("has_source", &self.core.source.is_some())
            .finish()
    }
}

impl<T: Clone + 'static> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// A root stream without replay.
    pub fn new() -> Self {
        Self::build("stream", None, false, Box::new(|_: &T| true))
    }

    /// A root stream with a diagnostic label.
    pub fn named(label: impl Into<String>) -> Self {
        Self::build(label, None, false, Box::new(|_: &T| true))
    }

    /// A root stream that replays its last value to new subscribers.
    pub fn replay() -> Self {
        Self::build("replay", None, true, Box::new(|_: &T| true))
    }

    /// Like [`replay`](Self::replay), but only replays values passing `test`.
    pub fn replay_when(test: impl Fn(&T) -> bool + 'static) -> Self {
        Self::build("replay", None, true, Box::new(test))
    }

    pub(crate) fn derived(source: Option<NodeRef>, label: &str) -> Self {
        Self::build(label, source, false, Box::new(|_: &T| true))
    }

    pub(crate) fn derived_replay(source: Option<NodeRef>, label: &str) -> Self {
        Self::build(label, source, true, Box::new(|_: &T| true))
    }

    fn build(
        label: impl Into<String>,
        source: Option<NodeRef>,
        replay_last: bool,
        last_value_test: ValueTest<T>,
    ) -> Self {
        Self {
            core: Rc::new(StreamCore {
                id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
                emitter: Emitter::new(),
                source,
                peers: RefCell::new(Vec::new()),
                replay_last: Cell::new(replay_last),
                last_value: RefCell::new(None),
                last_value_test,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.core.label
    }

    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.core.replay_last.get()
    }

    /// Turn replay-last on or off. Turning it off forgets the stored value.
    pub fn set_replay_last(&self, replay_last: bool) {
        self.core.replay_last.set(replay_last);
        if !replay_last {
            self.core.last_value.borrow_mut().take();
        }
    }

    /// The stored last value, when replay is on.
    #[must_use]
    pub fn last_value(&self) -> Option<T> {
        self.core.last_value.borrow().clone()
    }

    /// Emit `value` on the value channel.
    pub fn emit_value(&self, value: T) -> Result<(), ListenerError> {
        if self.core.replay_last.get() {
            *self.core.last_value.borrow_mut() = Some(value.clone());
        }
        self.core.emitter.emit_uncached(VALUE_EVENT, value)?;
        Ok(())
    }

    /// Register `f`, replaying the last value first when applicable.
    ///
    /// `f` also receives the stream itself. The returned guard keeps the
    /// stream alive.
    pub fn subscribe(&self, f: impl Fn(&T, &Stream<T>) + 'static) -> Subscription {
        if let Some(last) = self.replay_value() {
            f(&last, self);
        }
        self.attach(move |value: &T, stream: &Stream<T>| -> HandlerResult {
            f(value, stream);
            Ok(())
        })
    }

    /// Fallible variant of [`subscribe`](Self::subscribe). A failing replay
    /// leaves `f` unregistered.
    pub fn try_subscribe(
        &self,
        f: impl Fn(&T, &Stream<T>) -> HandlerResult + 'static,
    ) -> Result<Subscription, ListenerError> {
        if let Some(last) = self.replay_value() {
            f(&last, self).map_err(|source| ListenerError::new(VALUE_EVENT, source))?;
        }
        Ok(self.attach(f))
    }

    /// Nodes from the root down to this stream.
    #[must_use]
    pub fn path(&self) -> Vec<NodeRef> {
        let mut path = vec![self.node()];
        let mut cursor = self.core.source.clone();
        while let Some(node) = cursor {
            cursor = node.upstream();
            path.push(node);
        }
        path.reverse();
        path
    }

    /// Dispose this stream, then every node on its path.
    pub fn terminate(&self) {
        let path = self.path();
        debug!(
            stream = self.core.id,
            label = %self.core.label,
            depth = path.len(),
            "stream.terminate"
        );
        self.dispose();
        for node in &path {
            node.dispose();
        }
    }

    /// Run this stream's disposers and drop its handlers only.
    pub fn dispose(&self) {
        self.core.emitter.terminate();
    }

    /// Register a cleanup for teardown.
    pub fn add_disposer(&self, f: impl FnOnce() + 'static) {
        self.core.emitter.add_disposer(f);
    }

    /// Keep `subscription` alive until teardown.
    pub fn own(&self, subscription: Subscription) {
        self.core.emitter.own(subscription);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.emitter.listener_count(VALUE_EVENT)
    }

    /// Type-erased handle for paths and [`Pipeline`](crate::Pipeline).
    #[must_use]
    pub fn node(&self) -> NodeRef {
        let core: Rc<StreamCore<T>> = Rc::clone(&self.core);
        core
    }

    pub fn downgrade(&self) -> WeakStream<T> {
        WeakStream {
            core: Rc::downgrade(&self.core),
        }
    }

    /// Keep `node` alive as long as this stream (fan-in inputs).
    pub(crate) fn retain_peer(&self, node: NodeRef) {
        self.core.peers.borrow_mut().push(node);
    }

    pub(crate) fn emitter(&self) -> &Emitter<T> {
        &self.core.emitter
    }

    pub(crate) fn replay_value(&self) -> Option<T> {
        if !self.core.replay_last.get() {
            return None;
        }
        let last = self.core.last_value.borrow();
        last.as_ref()
            .filter(|value| (self.core.last_value_test)(value))
            .cloned()
    }

    fn attach(&self, f: impl Fn(&T, &Stream<T>) -> HandlerResult + 'static) -> Subscription {
        let weak = Rc::downgrade(&self.core);
        self.core
            .emitter
            .try_on(VALUE_EVENT, move |value| match weak.upgrade() {
                Some(core) => f(value, &Stream { core }),
                None => Ok(()),
            })
            .retaining(Rc::clone(&self.core))
    }
}

impl<T: Clone + 'static> Subscribable<T> for Stream<T> {
    fn subscribe_with(&self, handler: Handler<T>) -> Result<Subscription, ListenerError> {
        self.try_subscribe(move |value, _| handler(value))
    }
}

/// Non-owning handle to a [`Stream`].
pub struct WeakStream<T> {
    core: Weak<StreamCore<T>>,
}

impl<T> Clone for WeakStream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<T> WeakStream<T> {
    pub fn upgrade(&self) -> Option<Stream<T>> {
        self.core.upgrade().map(|core| Stream { core })
    }
}
