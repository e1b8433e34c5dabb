#![forbid(unsafe_code)]

//! Key-value store contract and an in-memory implementation.
//!
//! A store may need to load before it can be used. Readiness is observable
//! twice: synchronously through [`KeyValueStore::is_ready`] and as a
//! [`READY_EVENT`] on the store's [`events`](KeyValueStore::events) emitter.

use std::cell::RefCell;
use std::fmt;

use patchwire_reactive::{Emitter, Payload, Signal};
use tracing::debug;

use crate::error::{Result, StoreError};

pub const READY_EVENT: &str = "ready";
pub const LOADED_EVENT: &str = "loaded";
pub const RESTORED_EVENT: &str = "restored";

/// Lifecycle notifications published by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Ready,
    Loaded { count: usize },
    Restored { count: usize },
}

impl Payload for StoreEvent {}

pub trait KeyValueStore<V> {
    fn get(&self, key: &str) -> Option<V>;

    /// Insert or replace. Fails with [`StoreError::NotReady`] before the
    /// store has loaded.
    fn set(&self, key: &str, value: V) -> Result<()>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`; `false` when it was absent.
    fn delete(&self, key: &str) -> bool;

    /// Visit every entry in storage order.
    fn for_each(&self, f: &mut dyn FnMut(&str, &V));

    fn is_ready(&self) -> bool;

    fn events(&self) -> &Emitter<StoreEvent>;

    fn require(&self, key: &str) -> Result<V> {
        self.get(key).ok_or_else(|| StoreError::Missing {
            key: key.to_owned(),
        })
    }
}

/// Insertion-ordered store held in memory.
pub struct MemoryStore<V> {
    entries: RefCell<Vec<(String, V)>>,
    ready: Signal<bool>,
    events: Emitter<StoreEvent>,
}

impl<V: Clone + 'static> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + 'static> MemoryStore<V> {
    /// An empty store that is not ready until [`load`](Self::load).
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            ready: Signal::new(false),
            events: Emitter::new(),
        }
    }

    /// Add `entries` in order and mark the store ready.
    ///
    /// Publishes [`StoreEvent::Loaded`], then [`StoreEvent::Ready`] the
    /// first time.
    pub fn load<K: Into<String>>(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<usize> {
        let mut count = 0;
        for (key, value) in entries {
            self.upsert(key.into(), value);
            count += 1;
        }
        debug!(count, "store.load");
        let became_ready = self.ready.set(true)?;
        self.events.emit(LOADED_EVENT, StoreEvent::Loaded { count })?;
        if became_ready {
            self.events.emit(READY_EVENT, StoreEvent::Ready)?;
        }
        Ok(count)
    }

    /// Readiness as a signal, for consumers that want change notification.
    #[must_use]
    pub fn ready_signal(&self) -> &Signal<bool> {
        &self.ready
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn upsert(&self, key: String, value: V) {
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
    }
}

impl<V: Clone + 'static> KeyValueStore<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> Option<V> {
        self.entries
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn set(&self, key: &str, value: V) -> Result<()> {
        if !self.ready.get() {
            return Err(StoreError::NotReady);
        }
        self.upsert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
    }

    fn for_each(&self, f: &mut dyn FnMut(&str, &V)) {
        // Snapshot so `f` may write back into the store.
        let entries = self.entries.borrow().clone();
        for (key, value) in &entries {
            f(key, value);
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.get()
    }

    fn events(&self) -> &Emitter<StoreEvent> {
        &self.events
    }
}

impl<V> fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.borrow().len())
            .field("ready", &self.ready)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn set_before_load_is_rejected() {
        let store = MemoryStore::<String>::new();
        assert!(!store.is_ready());
        assert!(matches!(store.set("k", "v".into()), Err(StoreError::NotReady)));
    }

    #[test]
    fn load_marks_ready_and_publishes_events_in_order() {
        let store = MemoryStore::<u32>::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut subs = Vec::new();
        for name in [LOADED_EVENT, READY_EVENT] {
            let events = Rc::clone(&events);
            subs.push(store.events().on(name, move |e| events.borrow_mut().push(*e)));
        }

        assert_eq!(store.load([("a", 1), ("b", 2)]).unwrap(), 2);
        assert_eq!(store.load([("c", 3)]).unwrap(), 1);

        assert!(store.is_ready());
        assert_eq!(
            *events.borrow(),
            vec![
                StoreEvent::Loaded { count: 2 },
                StoreEvent::Ready,
                StoreEvent::Loaded { count: 1 },
            ]
        );
    }

    #[test]
    fn crud_and_storage_order() {
        let store = MemoryStore::new();
        store.load([("first", 1), ("second", 2)]).unwrap();
        store.set("third", 3).unwrap();
        store.set("first", 10).unwrap();

        assert_eq!(store.get("first"), Some(10));
        assert!(store.has("second"));
        assert!(store.delete("second"));
        assert!(!store.delete("second"));
        assert!(matches!(store.require("second"), Err(StoreError::Missing { .. })));

        let mut keys = Vec::new();
        store.for_each(&mut |key: &str, _: &i32| keys.push(key.to_owned()));
        assert_eq!(keys, vec!["first", "third"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn ready_signal_notifies_subscribers() {
        let store = MemoryStore::<u8>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = store
            .ready_signal()
            .subscribe(move |ready| seen_clone.borrow_mut().push(*ready));
        store.load(std::iter::empty::<(String, u8)>()).unwrap();
        assert_eq!(*seen.borrow(), vec![false, true]);
    }
}
