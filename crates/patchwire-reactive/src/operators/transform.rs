#![forbid(unsafe_code)]

//! Synchronous, per-value operators.

use std::cell::RefCell;

use tracing::debug;

use super::feed;
use crate::stream::Stream;

impl<T: Clone + 'static> Stream<T> {
    /// Forward `f(value)`.
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Stream<U> {
        let target = Stream::derived(Some(self.node()), "map");
        feed(self, &target, move |value, out| {
            out.emit_value(f(value))?;
            Ok(())
        });
        target
    }

    /// Forward values accepted by `predicate`.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let target = Stream::derived(Some(self.node()), "filter");
        feed(self, &target, move |value, out| {
            if predicate(value) {
                out.emit_value(value.clone())?;
            }
            Ok(())
        });
        target
    }

    /// Emit the running accumulator. `seed` itself is never emitted.
    pub fn scan<A: Clone + 'static>(
        &self,
        reducer: impl Fn(&A, &T) -> A + 'static,
        seed: A,
    ) -> Stream<A> {
        let target = Stream::derived(Some(self.node()), "scan");
        let acc = RefCell::new(seed);
        feed(self, &target, move |value, out| {
            let next = reducer(&acc.borrow(), value);
            *acc.borrow_mut() = next.clone();
            out.emit_value(next)?;
            Ok(())
        });
        target
    }

    /// Drop values `same` considers equal to the previous one. The first
    /// value always passes.
    pub fn distinct_until_changed_by(
        &self,
        same: impl Fn(&T, &T) -> bool + 'static,
    ) -> Stream<T> {
        let target = Stream::derived(Some(self.node()), "distinct_until_changed");
        let previous: RefCell<Option<T>> = RefCell::new(None);
        feed(self, &target, move |value, out| {
            let repeated = previous
                .borrow()
                .as_ref()
                .is_some_and(|prev| same(prev, value));
            if repeated {
                return Ok(());
            }
            *previous.borrow_mut() = Some(value.clone());
            out.emit_value(value.clone())?;
            Ok(())
        });
        target
    }

    /// Pass values through unchanged, tracing `render(value)` at debug level.
    pub fn log(&self, render: impl Fn(&T) -> String + 'static) -> Stream<T> {
        let target = Stream::derived(Some(self.node()), "log");
        feed(self, &target, move |value, out| {
            debug!(stream = out.id(), value = %render(value), "stream.log");
            out.emit_value(value.clone())?;
            Ok(())
        });
        target
    }
}

impl<T: Clone + PartialEq + 'static> Stream<T> {
    /// [`distinct_until_changed_by`](Self::distinct_until_changed_by) with `==`.
    pub fn distinct_until_changed(&self) -> Stream<T> {
        self.distinct_until_changed_by(|a: &T, b: &T| a == b)
    }
}
