#![forbid(unsafe_code)]

//! Deferred conditional emission raced against a deadline.
//!
//! # Design
//!
//! [`Emitter::deferred_emit`] asks a condition whether a payload may be
//! emitted yet. The condition answers with a [`Readiness`]: either "ready
//! now", or a notifier emitter that will fire
//! [`OUTPUT_EVENT`](crate::OUTPUT_EVENT) once it is. In the second case a
//! [`TimeoutNotifier`] is armed and the two notifiers race; whichever
//! settles first decides the outcome.
//!
//! # Invariants
//!
//! 1. Exactly one of {payload emitted, failure callback} happens per call.
//! 2. Both notifiers are disposed before `deferred_emit` returns, whatever
//!    the outcome, and also when the returned future is dropped early.
//! 3. The final emit happens after disposal, so nothing the winner
//!    triggers can observe a still-armed timer.
//!
//! # Failure Modes
//!
//! | Cause | Outcome |
//! |---|---|
//! | deadline elapsed | [`RaceOutcome::TimedOut`], [`ReactiveError::Timeout`] |
//! | notifier emitted `error` | [`RaceOutcome::Error`], [`ReactiveError::Rejected`] |
//! | notifier terminated unsettled | [`RaceOutcome::Error`], [`ReactiveError::Closed`] |
//! | condition failed | [`RaceOutcome::Error`], [`ReactiveError::Condition`] |
//! | condition said [`Readiness::NotReady`] | [`RaceOutcome::Error`], [`ReactiveError::Configuration`] |
//! | waiting with no tokio runtime | [`RaceOutcome::Error`], [`ReactiveError::NoRuntime`] |
//! | a listener of the final emit failed | [`RaceOutcome::Error`], [`ReactiveError::Listener`] |

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::{Either, select, select_all};
use tokio::task::{self, JoinHandle};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::emitter::{ERROR_EVENT, Emitter, Payload};
use crate::error::{BoxError, ReactiveError, WaitError};

/// What a readiness condition decided.
#[derive(Debug)]
pub enum Readiness {
    /// Emit immediately.
    Ready,
    /// Wait for this notifier to emit [`OUTPUT_EVENT`](crate::OUTPUT_EVENT)
    /// (or `error`).
    Wait(Emitter<()>),
    /// Neither ready nor waitable; a configuration error.
    NotReady,
}

impl From<bool> for Readiness {
    fn from(ready: bool) -> Self {
        if ready { Self::Ready } else { Self::NotReady }
    }
}

impl From<Emitter<()>> for Readiness {
    fn from(notifier: Emitter<()>) -> Self {
        Self::Wait(notifier)
    }
}

/// Terminal state of a [`deferred_emit`](Emitter::deferred_emit) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceOutcome {
    /// Ready on the first check; emitted without waiting.
    SyncReady,
    /// The readiness notifier won the race; emitted.
    Ready,
    /// The deadline won; the failure callback ran.
    TimedOut,
    /// The race failed; the failure callback ran.
    Error,
}

impl RaceOutcome {
    #[must_use]
    pub const fn emitted(self) -> bool {
        matches!(self, Self::SyncReady | Self::Ready)
    }
}

/// Handed to the failure callback of a race that did not emit.
#[derive(Debug)]
pub struct Expired<P> {
    pub event: String,
    pub data: P,
    pub ttl: Duration,
    pub cause: ReactiveError,
}

impl<P> Expired<P> {
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.cause.is_timeout()
    }
}

/// An emitter that fires [`ERROR_EVENT`] once `ttl` elapses.
pub struct TimeoutNotifier {
    emitter: Emitter<()>,
    timer: RefCell<Option<JoinHandle<()>>>,
    ttl: Duration,
}

impl TimeoutNotifier {
    /// Start the deadline timer.
    ///
    /// # Panics
    ///
    /// Panics outside a [`tokio::task::LocalSet`].
    pub fn arm(ttl: Duration) -> Self {
        let emitter = Emitter::new();
        let weak = emitter.downgrade();
        let timer = task::spawn_local(async move {
            sleep(ttl).await;
            if let Some(emitter) = weak.upgrade()
                && let Err(error) = emitter.emit(ERROR_EVENT, ())
            {
                warn!(%error, "race.timeout listener failed");
            }
        });
        Self {
            emitter,
            timer: RefCell::new(Some(timer)),
            ttl,
        }
    }

    #[must_use]
    pub fn notifier(&self) -> &Emitter<()> {
        &self.emitter
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the timer is still pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer
            .borrow()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Abort the timer and terminate the notifier. Idempotent.
    pub fn dispose(&self) {
        let timer = self.timer.borrow_mut().take();
        if let Some(timer) = timer {
            timer.abort();
        }
        self.emitter.terminate();
    }
}

impl Drop for TimeoutNotifier {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for TimeoutNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutNotifier")
            .field("ttl", &self.ttl)
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Wait for the first of `notifiers` to settle via
/// [`to_future`](Emitter::to_future).
///
/// Returns the winner's index and outcome; `None` for an empty slice. The
/// losers' listeners are removed before returning.
pub async fn race<P: Clone + 'static>(
    notifiers: &[Emitter<P>],
) -> Option<(usize, Result<P, WaitError<P>>)> {
    if notifiers.is_empty() {
        return None;
    }
    let waiters: Vec<_> = notifiers.iter().map(Emitter::to_future).collect();
    let (outcome, index, losers) = select_all(waiters).await;
    drop(losers);
    Some((index, outcome))
}

/// Disposes both race participants on every exit path.
struct RaceGuard {
    readiness: Emitter<()>,
    timeout: TimeoutNotifier,
}

impl Drop for RaceGuard {
    fn drop(&mut self) {
        self.timeout.dispose();
        self.readiness.terminate();
    }
}

fn expire<P>(
    event: &str,
    data: P,
    ttl: Duration,
    cause: ReactiveError,
    on_timeout_or_error: impl FnOnce(Expired<P>),
) -> RaceOutcome {
    let outcome = if cause.is_timeout() {
        warn!(event, ttl_ms = ttl.as_millis() as u64, "race.timeout");
        RaceOutcome::TimedOut
    } else {
        warn!(event, %cause, "race.error");
        RaceOutcome::Error
    };
    on_timeout_or_error(Expired {
        event: event.to_owned(),
        data,
        ttl,
        cause,
    });
    outcome
}

impl<P: Payload> Emitter<P> {
    /// Emit `(event, data)` once `condition` says it is ready, giving up
    /// after `ttl`.
    ///
    /// The readiness notifier returned by `condition` is terminated when the
    /// race ends; hand each call its own notifier.
    ///
    /// Waiting needs a tokio runtime; without one the race ends as
    /// [`RaceOutcome::Error`] with [`ReactiveError::NoRuntime`].
    ///
    /// # Panics
    ///
    /// Panics on a runtime thread outside a [`tokio::task::LocalSet`] when
    /// `condition` returns [`Readiness::Wait`].
    pub async fn deferred_emit<C, Fut>(
        &self,
        event: &str,
        data: P,
        condition: C,
        ttl: Duration,
        on_timeout_or_error: impl FnOnce(Expired<P>),
    ) -> RaceOutcome
    where
        C: FnOnce(&P) -> Fut,
        Fut: Future<Output = Result<Readiness, BoxError>>,
    {
        let readiness = match condition(&data).await {
            Ok(readiness) => readiness,
            Err(source) => {
                let cause = ReactiveError::Condition {
                    event: event.to_owned(),
                    source,
                };
                return expire(event, data, ttl, cause, on_timeout_or_error);
            }
        };

        let notifier = match readiness {
            Readiness::Ready => {
                return match self.emit(event, data.clone()) {
                    Ok(_) => {
                        debug!(emitter = self.id(), event, "race.sync_ready");
                        RaceOutcome::SyncReady
                    }
                    Err(error) => expire(event, data, ttl, error.into(), on_timeout_or_error),
                };
            }
            Readiness::NotReady => {
                let cause = ReactiveError::configuration(event);
                return expire(event, data, ttl, cause, on_timeout_or_error);
            }
            Readiness::Wait(notifier) => notifier,
        };

        if let Err(cause) = ReactiveError::require_runtime("deferred_emit") {
            notifier.terminate();
            return expire(event, data, ttl, cause, on_timeout_or_error);
        }

        debug!(
            emitter = self.id(),
            event,
            ttl_ms = ttl.as_millis() as u64,
            "race.start"
        );
        let guard = RaceGuard {
            readiness: notifier,
            timeout: TimeoutNotifier::arm(ttl),
        };
        let ready = guard.readiness.to_future();
        let expired = guard.timeout.notifier().to_future();

        let cause = match select(ready, expired).await {
            Either::Left((Ok(()), _expired)) => None,
            Either::Left((Err(WaitError::Rejected(())), _expired)) => Some(ReactiveError::Rejected {
                event: event.to_owned(),
            }),
            Either::Left((Err(WaitError::Closed), _expired)) => Some(ReactiveError::Closed {
                event: event.to_owned(),
            }),
            Either::Right((_, _ready)) => Some(ReactiveError::Timeout {
                event: event.to_owned(),
                ttl,
            }),
        };
        drop(guard);

        match cause {
            None => match self.emit(event, data.clone()) {
                Ok(_) => {
                    debug!(emitter = self.id(), event, "race.ready");
                    RaceOutcome::Ready
                }
                Err(error) => expire(event, data, ttl, error.into(), on_timeout_or_error),
            },
            Some(cause) => expire(event, data, ttl, cause, on_timeout_or_error),
        }
    }
}
