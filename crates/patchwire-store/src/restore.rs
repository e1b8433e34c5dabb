#![forbid(unsafe_code)]

//! Recreating persisted ports and connections in dependency order.
//!
//! # Design
//!
//! Records are replayed in storage order, which is not dependency order: a
//! connection may be stored before the ports it links. Ports are emitted on
//! [`PORT_EVENT`] as soon as they are read, landing in the emitter's replay
//! cache. Each connection goes through [`Emitter::deferred_emit`] with a
//! condition that is ready when both ports are cached, and otherwise waits
//! for them with [`Emitter::until`].
//!
//! # Invariants
//!
//! 1. A connection is emitted only after both of its ports were emitted.
//! 2. A connection whose ports do not appear within the TTL is reported as
//!    an orphan and never emitted.
//! 3. [`RESTORED_EVENT`] is published once, after every record settled.
//! 4. Connection tasks belong to the restore call. When it returns early
//!    or its future is dropped, they are aborted, so nothing is emitted
//!    after the caller saw the outcome.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::mem;
use std::rc::Rc;

use futures::future::join_all;
use patchwire_reactive::{
    BoxError, ERROR_EVENT, Emitter, OUTPUT_EVENT, Payload, RaceOutcome, Readiness, Waiter,
};
use serde::{Deserialize, Serialize};
use tokio::task::{self, JoinSet};
use tracing::{debug, warn};

use crate::config::RestoreConfig;
use crate::error::{Result, StoreError};
use crate::store::{KeyValueStore, READY_EVENT, RESTORED_EVENT, StoreEvent};

pub const PORT_EVENT: &str = "port";
pub const CONNECTION_EVENT: &str = "connection";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRecord {
    pub id: String,
    pub node: String,
}

impl Payload for PortRecord {
    fn payload_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub from: String,
    pub to: String,
}

impl ConnectionRecord {
    /// Port ids this connection depends on, without duplicates.
    pub fn endpoints(&self) -> Vec<&str> {
        if self.from == self.to {
            vec![self.from.as_str()]
        } else {
            vec![self.from.as_str(), self.to.as_str()]
        }
    }
}

impl Payload for ConnectionRecord {
    fn payload_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

/// A persisted record, stored as JSON tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Port(PortRecord),
    Connection(ConnectionRecord),
}

impl Entity {
    pub fn to_json(&self) -> String {
        // Plain structs of strings always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse the JSON record stored under `key`.
pub fn decode_entity(key: &str, raw: &str) -> Result<Entity> {
    serde_json::from_str(raw).map_err(|source| StoreError::Decode {
        key: key.to_owned(),
        source,
    })
}

/// What a restore pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub ports: usize,
    pub connections: usize,
    /// Connections emitted without waiting for anything.
    pub immediate: usize,
    /// Connections whose ports never appeared (or whose wait failed).
    pub orphans: Vec<ConnectionRecord>,
    /// Keys whose records could not be decoded.
    pub invalid: Vec<String>,
}

impl RestoreReport {
    #[must_use]
    pub fn restored(&self) -> usize {
        self.ports + self.connections
    }
}

/// Condition for a connection: ready when both ports are cached, otherwise
/// a notifier that fires once the missing ones arrive.
fn endpoints_ready(
    ports: &Emitter<PortRecord>,
    connection: &ConnectionRecord,
) -> impl Future<Output = std::result::Result<Readiness, BoxError>> + use<> {
    let missing: Vec<Waiter<PortRecord>> = connection
        .endpoints()
        .into_iter()
        .map(|id| ports.until(PORT_EVENT, id))
        .filter(|waiter| !waiter.is_ready())
        .collect();

    async move {
        if missing.is_empty() {
            return Ok(Readiness::Ready);
        }
        let notifier = Emitter::<()>::new();
        let weak = notifier.downgrade();
        let pending = task::spawn_local(async move {
            let arrived = join_all(missing).await;
            let event = if arrived.iter().all(|port| port.is_ok()) {
                OUTPUT_EVENT
            } else {
                ERROR_EVENT
            };
            if let Some(notifier) = weak.upgrade()
                && let Err(error) = notifier.emit(event, ())
            {
                warn!(%error, "restore.endpoints notifier failed");
            }
        });
        notifier.add_disposer(move || pending.abort());
        Ok(Readiness::Wait(notifier))
    }
}

/// Replays a store's records onto port and connection emitters.
pub struct Restorer {
    ports: Emitter<PortRecord>,
    connections: Emitter<ConnectionRecord>,
    config: RestoreConfig,
}

impl Default for Restorer {
    fn default() -> Self {
        Self::new(RestoreConfig::default())
    }
}

impl Restorer {
    pub fn new(config: RestoreConfig) -> Self {
        Self {
            ports: Emitter::new(),
            connections: Emitter::new(),
            config,
        }
    }

    /// Emits every restored [`PortRecord`] on [`PORT_EVENT`].
    #[must_use]
    pub fn ports(&self) -> &Emitter<PortRecord> {
        &self.ports
    }

    /// Emits every restored [`ConnectionRecord`] on [`CONNECTION_EVENT`].
    #[must_use]
    pub fn connections(&self) -> &Emitter<ConnectionRecord> {
        &self.connections
    }

    #[must_use]
    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    /// Restore every record of `store`.
    ///
    /// Must run inside a [`tokio::task::LocalSet`]. Fails when the store is
    /// not ready (after waiting, if configured) or when a listener of the
    /// port or `restored` channels fails.
    pub async fn restore<S>(&self, store: &S) -> Result<RestoreReport>
    where
        S: KeyValueStore<String> + ?Sized,
    {
        self.ensure_ready(store).await?;

        let mut entries = Vec::new();
        store.for_each(&mut |key: &str, raw: &String| {
            entries.push((key.to_owned(), raw.clone()));
        });
        debug!(
            entries = entries.len(),
            ttl_ms = self.config.ttl.as_millis() as u64,
            "restore.start"
        );

        let mut report = RestoreReport::default();
        let orphans: Rc<RefCell<Vec<ConnectionRecord>>> = Rc::default();
        let mut pending = JoinSet::new();

        for (key, raw) in entries {
            match decode_entity(&key, &raw) {
                Ok(Entity::Port(port)) => {
                    self.ports.emit(PORT_EVENT, port)?;
                    report.ports += 1;
                }
                Ok(Entity::Connection(connection)) => {
                    self.spawn_connection(&mut pending, connection, Rc::clone(&orphans));
                }
                Err(error) => {
                    warn!(key = %key, %error, "restore.invalid_record");
                    report.invalid.push(key);
                }
            }
            // Let waiting connections observe the port just emitted.
            task::yield_now().await;
        }

        while let Some(outcome) = pending.join_next().await {
            match outcome {
                Ok(RaceOutcome::SyncReady) => {
                    report.connections += 1;
                    report.immediate += 1;
                }
                Ok(RaceOutcome::Ready) => report.connections += 1,
                Ok(RaceOutcome::TimedOut | RaceOutcome::Error) => {}
                Err(error) => warn!(%error, "restore.connection task failed"),
            }
        }
        report.orphans = mem::take(&mut *orphans.borrow_mut());

        debug!(
            ports = report.ports,
            connections = report.connections,
            orphans = report.orphans.len(),
            invalid = report.invalid.len(),
            "restore.done"
        );
        store.events().emit(
            RESTORED_EVENT,
            StoreEvent::Restored {
                count: report.restored(),
            },
        )?;
        Ok(report)
    }

    async fn ensure_ready<S>(&self, store: &S) -> Result<()>
    where
        S: KeyValueStore<String> + ?Sized,
    {
        if store.is_ready() {
            return Ok(());
        }
        if !self.config.wait_for_ready {
            return Err(StoreError::NotReady);
        }
        debug!(ttl_ms = self.config.ttl.as_millis() as u64, "restore.wait_ready");
        let ready = store
            .events()
            .wait_for(READY_EVENT, |event| *event == StoreEvent::Ready);
        match tokio::time::timeout(self.config.ttl, ready).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(StoreError::NotReady),
        }
    }

    fn spawn_connection(
        &self,
        pending: &mut JoinSet<RaceOutcome>,
        connection: ConnectionRecord,
        orphans: Rc<RefCell<Vec<ConnectionRecord>>>,
    ) {
        let ports = self.ports.clone();
        let connections = self.connections.clone();
        let ttl = self.config.ttl;
        pending.spawn_local(async move {
            connections
                .deferred_emit(
                    CONNECTION_EVENT,
                    connection,
                    move |connection: &ConnectionRecord| endpoints_ready(&ports, connection),
                    ttl,
                    move |expired| {
                        warn!(
                            connection = %expired.data.id,
                            from = %expired.data.from,
                            to = %expired.data.to,
                            cause = %expired.cause,
                            "restore.orphan"
                        );
                        orphans.borrow_mut().push(expired.data);
                    },
                )
                .await
        });
    }
}

impl fmt::Debug for Restorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Restorer")
            .field("config", &self.config)
            .field("ports", &self.ports)
            .field("connections", &self.connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_json_is_tagged_by_kind() {
        let port = Entity::Port(PortRecord {
            id: "p1".into(),
            node: "n1".into(),
        });
        let json = port.to_json();
        assert!(json.contains(r#""kind":"port""#));
        assert_eq!(decode_entity("port:p1", &json).unwrap(), port);
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let err = decode_entity("x", r#"{"kind":"node","id":"n1"}"#).unwrap_err();
        assert!(matches!(err, StoreError::Decode { ref key, .. } if key == "x"));
    }

    #[test]
    fn endpoints_deduplicate_self_loops() {
        let looped = ConnectionRecord {
            id: "c".into(),
            from: "p".into(),
            to: "p".into(),
        };
        assert_eq!(looped.endpoints(), vec!["p"]);
    }

    #[test]
    fn report_counts_ports_and_connections() {
        let report = RestoreReport {
            ports: 2,
            connections: 1,
            ..RestoreReport::default()
        };
        assert_eq!(report.restored(), 3);
    }
}
