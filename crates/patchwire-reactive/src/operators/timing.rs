#![forbid(unsafe_code)]

//! Time-based operators driven by `tokio::time`.
//!
//! Timers run as local tasks, so these operators must be used inside a
//! [`tokio::task::LocalSet`]. A value whose timer fires after the derived
//! stream was dropped or disposed is discarded. Errors raised by subscribers
//! inside a timer have no caller to return to; they are logged at `warn`.
//!
//! A value reaching a timed operator with no tokio runtime at all fails the
//! emit that carried it with [`ReactiveError::NoRuntime`].

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::{self, JoinHandle};
use tokio::time::{Instant, sleep};
use tracing::warn;

use super::feed;
use crate::error::ReactiveError;
use crate::stream::{Stream, WeakStream};

fn emit_later<T: Clone + 'static>(
    out: WeakStream<T>,
    value: T,
    after: Duration,
    operator: &'static str,
) -> Result<JoinHandle<()>, ReactiveError> {
    ReactiveError::require_runtime(operator)?;
    Ok(task::spawn_local(async move {
        sleep(after).await;
        if let Some(out) = out.upgrade()
            && let Err(error) = out.emit_value(value)
        {
            warn!(stream = out.id(), operator, %error, "stream.timer emit failed");
        }
    }))
}

impl<T: Clone + 'static> Stream<T> {
    /// Emit a value once `period` has passed without a newer one.
    ///
    /// # Panics
    ///
    /// Panics when a value arrives on a runtime thread outside a `LocalSet`.
    pub fn debounce(&self, period: Duration) -> Stream<T> {
        let target = Stream::derived(Some(self.node()), "debounce");
        let pending: Rc<RefCell<Option<JoinHandle<()>>>> = Rc::default();

        let on_dispose = Rc::clone(&pending);
        target.add_disposer(move || {
            if let Some(timer) = on_dispose.borrow_mut().take() {
                timer.abort();
            }
        });

        feed(self, &target, move |value, out| {
            let superseded = pending.borrow_mut().take();
            if let Some(timer) = superseded {
                timer.abort();
            }
            let timer = emit_later(out.downgrade(), value.clone(), period, "debounce")?;
            *pending.borrow_mut() = Some(timer);
            Ok(())
        });
        target
    }

    /// Leading-edge throttle: forward a value iff at least `period` has
    /// passed since the last forwarded one. Nothing is flushed afterwards.
    pub fn throttle(&self, period: Duration) -> Stream<T> {
        let target = Stream::derived(Some(self.node()), "throttle");
        let last_emit: Cell<Option<Instant>> = Cell::new(None);
        feed(self, &target, move |value, out| {
            let now = Instant::now();
            if last_emit
                .get()
                .is_some_and(|at| now.duration_since(at) < period)
            {
                return Ok(());
            }
            last_emit.set(Some(now));
            out.emit_value(value.clone())?;
            Ok(())
        });
        target
    }

    /// Forward each value after `after`, each on its own timer.
    ///
    /// # Panics
    ///
    /// Panics when a value arrives on a runtime thread outside a `LocalSet`.
    pub fn delay(&self, after: Duration) -> Stream<T> {
        let target = Stream::derived(Some(self.node()), "delay");
        let timers: Rc<RefCell<Vec<JoinHandle<()>>>> = Rc::default();

        let on_dispose = Rc::clone(&timers);
        target.add_disposer(move || {
            let timers = mem::take(&mut *on_dispose.borrow_mut());
            for timer in timers {
                timer.abort();
            }
        });

        feed(self, &target, move |value, out| {
            let timer = emit_later(out.downgrade(), value.clone(), after, "delay")?;
            let mut timers = timers.borrow_mut();
            timers.retain(|timer| !timer.is_finished());
            timers.push(timer);
            Ok(())
        });
        target
    }
}
