#![forbid(unsafe_code)]

//! Persisted entities for patchwire.
//!
//! A [`KeyValueStore`] holds JSON records of ports and connections. The
//! [`Restorer`] replays them onto emitters so that every connection appears
//! after both of its ports, however the records were ordered in storage.
//!
//! # Configuration
//!
//! [`RestoreConfig::from_env`] reads `PATCHWIRE_RESTORE_TTL_MS` and
//! `PATCHWIRE_RESTORE_WAIT_READY`; see [`config`].

pub mod config;
pub mod error;
pub mod restore;
pub mod store;

pub use config::{DEFAULT_RESTORE_TTL, RestoreConfig};
pub use error::{Result, StoreError};
pub use restore::{
    CONNECTION_EVENT, ConnectionRecord, Entity, PORT_EVENT, PortRecord, RestoreReport, Restorer,
    decode_entity,
};
pub use store::{KeyValueStore, LOADED_EVENT, MemoryStore, READY_EVENT, RESTORED_EVENT, StoreEvent};
