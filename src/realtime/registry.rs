use crate::db::models::Identity;
use crate::realtime::protocol::ClientFilter;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{RwLock, RwLockReadGuard};
use uuid::Uuid;

/// Frame queued for a connection's socket writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
    Ping,
    Close { code: u16, reason: String },
}

/// Which endpoint a connection came in on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Events,
    Video,
}

/// Resolved device set plus the client's own filter.
///
/// An empty device set means every device the identity is authorized for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subscription {
    pub devices: BTreeSet<String>,
    pub filter: ClientFilter,
}

/// A live streaming connection
#[derive(Debug)]
pub struct Connection {
    pub id: Uuid,
    pub kind: ConnectionKind,
    pub user_id: Uuid,
    identity: RwLock<Identity>,
    outbound: mpsc::Sender<Outbound>,
    subscription: RwLock<Option<Subscription>>,
}

impl Connection {
    pub fn new(kind: ConnectionKind, identity: Identity, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id: identity.user_id,
            identity: RwLock::new(identity),
            outbound,
            subscription: RwLock::new(None),
        }
    }

    /// Identity as of the handshake or the last subscription change
    pub async fn identity(&self) -> RwLockReadGuard<'_, Identity> {
        self.identity.read().await
    }

    pub async fn set_identity(&self, identity: Identity) {
        *self.identity.write().await = identity;
    }

    /// Sender half of the outbound queue
    pub fn outbound(&self) -> &mpsc::Sender<Outbound> {
        &self.outbound
    }

    /// The writer is alive and the queue has room
    pub fn is_writable(&self) -> bool {
        !self.outbound.is_closed() && self.outbound.capacity() > 0
    }

    pub async fn subscription(&self) -> Option<Subscription> {
        self.subscription.read().await.clone()
    }

    pub async fn set_subscription(&self, subscription: Option<Subscription>) {
        *self.subscription.write().await = subscription;
    }

    /// Queue a frame without waiting for capacity
    pub fn try_send(&self, frame: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.outbound.try_send(frame)
    }

    /// Serialize and queue a JSON message, waiting for capacity.
    /// Returns false once the connection is gone.
    pub async fn send_json<M: Serialize>(&self, message: &M) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize message for {}: {}", self.id, e);
                return false;
            }
        };

        self.outbound.send(Outbound::Text(text)).await.is_ok()
    }
}

/// Tracks every open connection.
///
/// `all` must hand out a snapshot that stays valid while connections are
/// added or removed concurrently.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Register a connection and return its shared handle
    async fn add(
        &self,
        kind: ConnectionKind,
        identity: Identity,
        outbound: mpsc::Sender<Outbound>,
    ) -> Arc<Connection>;

    /// Remove a connection; a no-op when it is already gone
    async fn remove(&self, id: &Uuid);

    async fn get(&self, id: &Uuid) -> Option<Arc<Connection>>;

    /// Point-in-time copy of every connection
    async fn all(&self) -> Vec<Arc<Connection>>;

    /// Replace the subscription of a connection; false when it is not registered
    async fn set_subscription(&self, id: &Uuid, devices: BTreeSet<String>, filter: ClientFilter) -> bool;

    async fn clear_subscription(&self, id: &Uuid);

    async fn len(&self) -> usize;
}

/// Single-process registry
#[derive(Default)]
pub struct InMemoryRegistry {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryRegistry {
    async fn add(
        &self,
        kind: ConnectionKind,
        identity: Identity,
        outbound: mpsc::Sender<Outbound>,
    ) -> Arc<Connection> {
        let username = identity.username.clone();
        let connection = Arc::new(Connection::new(kind, identity, outbound));

        self.connections
            .write()
            .await
            .insert(connection.id, connection.clone());

        info!(
            "Connection {} registered ({:?}, user {})",
            connection.id, kind, username
        );

        connection
    }

    async fn remove(&self, id: &Uuid) {
        if self.connections.write().await.remove(id).is_some() {
            info!("Connection {} removed", id);
        }
    }

    async fn get(&self, id: &Uuid) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    async fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    async fn set_subscription(&self, id: &Uuid, devices: BTreeSet<String>, filter: ClientFilter) -> bool {
        let Some(connection) = self.get(id).await else {
            debug!("Subscription update for unknown connection {}", id);
            return false;
        };

        connection
            .set_subscription(Some(Subscription { devices, filter }))
            .await;

        true
    }

    async fn clear_subscription(&self, id: &Uuid) {
        if let Some(connection) = self.get(id).await {
            connection.set_subscription(None).await;
        }
    }

    async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}
