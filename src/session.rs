//! Process-wide observable session state.
//!
//! Backed by a `watch` channel: readers always see a whole snapshot, and only
//! the connection manager and orchestrator within this crate publish changes.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::Identity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "identity")]
pub enum ConnectionState {
    NoProvider,
    Disconnected,
    Connected(Identity),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub app_name: String,
    pub connection: ConnectionState,
    /// Ledger-confirmed count for the connected identity, once read.
    pub shipment_count: Option<u64>,
}

impl SessionSnapshot {
    pub fn identity(&self) -> Option<&Identity> {
        match &self.connection {
            ConnectionState::Connected(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sender: Arc<watch::Sender<SessionSnapshot>>,
}

impl SessionStore {
    pub fn new(app_name: impl Into<String>) -> Self {
        let (sender, _) = watch::channel(SessionSnapshot {
            app_name: app_name.into(),
            connection: ConnectionState::Disconnected,
            shipment_count: None,
        });
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.sender.subscribe()
    }

    pub fn app_name(&self) -> String {
        self.sender.borrow().app_name.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.sender.borrow().identity().cloned()
    }

    pub fn connection(&self) -> ConnectionState {
        self.sender.borrow().connection.clone()
    }

    /// Replacing the identity drops the count read for the previous one.
    pub(crate) fn set_connection(&self, connection: ConnectionState) {
        self.sender.send_if_modified(|snapshot| {
            if snapshot.connection == connection {
                return false;
            }
            snapshot.connection = connection;
            snapshot.shipment_count = None;
            true
        });
    }

    /// Ignored when the identity changed since the count was read.
    pub(crate) fn set_shipment_count(&self, identity: &Identity, count: u64) {
        self.sender.send_if_modified(|snapshot| {
            if snapshot.identity() != Some(identity) || snapshot.shipment_count == Some(count) {
                return false;
            }
            snapshot.shipment_count = Some(count);
            true
        });
    }
}
