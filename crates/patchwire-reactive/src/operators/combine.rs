#![forbid(unsafe_code)]

//! Fan-in operators.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use tracing::warn;

use super::feed;
use crate::error::{HandlerResult, ListenerError};
use crate::handlers::Handler;
use crate::stream::Stream;
use crate::subscribable::Subscribable;

impl<T: Clone + 'static> Stream<T> {
    /// Pair each value with the latest value of `other`.
    ///
    /// Values arriving before `other` has emitted are dropped.
    pub fn with_latest_from<O: Clone + 'static>(&self, other: &Stream<O>) -> Stream<(T, O)> {
        let target = Stream::derived(Some(self.node()), "with_latest_from");
        target.retain_peer(other.node());

        let latest: Rc<RefCell<Option<O>>> = Rc::default();
        let slot = Rc::clone(&latest);
        target.own(other.subscribe(move |value, _| {
            *slot.borrow_mut() = Some(value.clone());
        }));

        feed(self, &target, move |value, out| {
            let Some(other) = latest.borrow().clone() else {
                return Ok(());
            };
            out.emit_value((value.clone(), other))?;
            Ok(())
        });
        target
    }
}

/// Forward values from every input in arrival order.
///
/// The first input becomes the merged stream's `source`; the others are
/// kept alive alongside it but are not on its path.
pub fn merge<T: Clone + 'static>(inputs: &[Stream<T>]) -> Stream<T> {
    let target = Stream::derived(inputs.first().map(Stream::node), "merge");
    for (index, input) in inputs.iter().enumerate() {
        if index > 0 {
            target.retain_peer(input.node());
        }
        feed(input, &target, |value, out| {
            out.emit_value(value.clone())?;
            Ok(())
        });
    }
    target
}

/// Combine named inputs into `{name: latest value}` snapshots.
///
/// Nothing is emitted until every distinct name has produced a value; after
/// that, each input emission yields exactly one snapshot. The result replays
/// its last snapshot to new subscribers.
///
/// Fails when an input rejects the subscription (a failing replay); inputs
/// already subscribed are released.
pub fn named_combine_latest<T, S, N, I>(
    inputs: I,
) -> Result<Stream<BTreeMap<String, T>>, ListenerError>
where
    T: Clone + 'static,
    S: Subscribable<T>,
    N: Into<String>,
    I: IntoIterator<Item = (N, S)>,
{
    let inputs: Vec<(String, S)> = inputs
        .into_iter()
        .map(|(name, input)| (name.into(), input))
        .collect();
    let expected = inputs
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    let target = Stream::derived_replay(None, "named_combine_latest");
    let latest: Rc<RefCell<BTreeMap<String, T>>> = Rc::default();

    for (name, input) in inputs {
        let weak = target.downgrade();
        let latest = Rc::clone(&latest);
        let input_name = name.clone();
        let handler: Handler<T> = Rc::new(move |value: &T| -> HandlerResult {
            let snapshot = {
                let mut latest = latest.borrow_mut();
                latest.insert(input_name.clone(), value.clone());
                (latest.len() == expected).then(|| latest.clone())
            };
            if let Some(snapshot) = snapshot
                && let Some(out) = weak.upgrade()
            {
                out.emit_value(snapshot)?;
            }
            Ok(())
        });
        match input.subscribe_with(handler) {
            Ok(subscription) => target.own(subscription),
            Err(error) => {
                warn!(input = %name, %error, "stream.named_combine_latest subscribe failed");
                target.dispose();
                return Err(error);
            }
        }
    }
    Ok(target)
}
