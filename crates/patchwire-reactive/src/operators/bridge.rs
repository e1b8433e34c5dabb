#![forbid(unsafe_code)]

//! Root streams fed by outside event sources.

use std::rc::Rc;

use tracing::warn;

use crate::emitter::Emitter;
use crate::stream::Stream;

/// Listener handle passed to an [`EventTarget`]. Identity is the `Rc`
/// allocation (`Rc::ptr_eq`).
pub type Listener<E> = Rc<dyn Fn(&E)>;

/// A host object that dispatches named events to registered listeners.
pub trait EventTarget {
    type Event: Clone + 'static;

    fn add_event_listener(&self, name: &str, listener: Listener<Self::Event>);

    /// Remove the listener that is `Rc::ptr_eq` to `listener`.
    fn remove_event_listener(&self, name: &str, listener: &Listener<Self::Event>);
}

/// A stream of `name` events from `target`.
///
/// Teardown of the stream removes the listener from the target. Listener
/// errors have no caller to return to and are logged.
pub fn from_event<E>(target: &E, name: &str) -> Stream<E::Event>
where
    E: EventTarget + Clone + 'static,
{
    let stream = Stream::named(format!("from_event:{name}"));
    let weak = stream.downgrade();
    let event = name.to_owned();
    let listener: Listener<E::Event> = Rc::new(move |payload: &E::Event| {
        if let Some(stream) = weak.upgrade()
            && let Err(error) = stream.emit_value(payload.clone())
        {
            warn!(event = %event, %error, "stream.from_event listener failed");
        }
    });
    target.add_event_listener(name, Rc::clone(&listener));

    let target = target.clone();
    let name = name.to_owned();
    stream.add_disposer(move || target.remove_event_listener(&name, &listener));
    stream
}

/// A stream of `event` payloads from `emitter`.
///
/// Errors from the stream's subscribers propagate to the emitter's caller.
pub fn from_emitter<P: Clone + 'static>(emitter: &Emitter<P>, event: &str) -> Stream<P> {
    let stream = Stream::named(format!("from_emitter:{event}"));
    let weak = stream.downgrade();
    stream.own(emitter.try_on(event, move |payload| {
        if let Some(stream) = weak.upgrade() {
            stream.emit_value(payload.clone())?;
        }
        Ok(())
    }));
    stream
}
