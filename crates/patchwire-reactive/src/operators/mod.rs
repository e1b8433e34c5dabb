#![forbid(unsafe_code)]

//! Stream operators.
//!
//! Chaining operators are inherent methods on [`Stream`]:
//!
//! | Operator | Module |
//! |---|---|
//! | `map`, `filter`, `scan`, `distinct_until_changed`, `log` | [`transform`] |
//! | `debounce`, `throttle`, `delay` | [`timing`] |
//! | `with_latest_from`, [`merge`], [`named_combine_latest`] | [`combine`] |
//! | [`from_event`], [`from_emitter`] | [`bridge`] |
//!
//! Every derived stream records its input as `source`, subscribes to it once
//! and owns that subscription, so `dispose`/`terminate` detaches it.
//!
//! Timed operators spawn onto the current [`tokio::task::LocalSet`] and
//! abort their pending timers on teardown.

pub mod bridge;
pub mod combine;
pub mod timing;
pub mod transform;

pub use bridge::{EventTarget, Listener, from_emitter, from_event};
pub use combine::{merge, named_combine_latest};

use tracing::warn;

use crate::error::HandlerResult;
use crate::stream::{Stream, VALUE_EVENT};

/// Subscribe `target` to `source`: replay the source's last value into
/// `step`, then forward every value. The subscription is owned by `target`
/// and only holds it weakly.
pub(crate) fn feed<T, U>(
    source: &Stream<T>,
    target: &Stream<U>,
    step: impl Fn(&T, &Stream<U>) -> HandlerResult + 'static,
) where
    T: Clone + 'static,
    U: Clone + 'static,
{
    if let Some(last) = source.replay_value()
        && let Err(error) = step(&last, target)
    {
        warn!(
            source = source.id(),
            target = target.id(),
            %error,
            "stream.replay failed"
        );
    }

    let weak = target.downgrade();
    let subscription = source.emitter().try_on(VALUE_EVENT, move |value| {
        match weak.upgrade() {
            Some(target) => step(value, &target),
            None => Ok(()),
        }
    });
    target.own(subscription);
}
