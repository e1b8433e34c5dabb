#![forbid(unsafe_code)]

//! patchwire public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub use patchwire_reactive as reactive;
#[cfg(feature = "store")]
pub use patchwire_store as store;

pub mod prelude {
    pub use patchwire_reactive::{
        Emitter, ListenerError, Pipeline, RaceOutcome, Readiness, Signal, Stream, Subscribable,
        SubscribableExt, Subscription, Waiter,
    };
    #[cfg(feature = "store")]
    pub use patchwire_store::{KeyValueStore, MemoryStore, RestoreConfig, Restorer};
}
