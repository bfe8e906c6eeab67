//! Real-time path event distribution: connection tracking, subscription
//! resolution and broadcast.

pub mod authorizer;
pub mod dispatcher;
pub mod protocol;
pub mod registry;

pub use authorizer::{authorize_against, Authorization, SubscriptionAuthorizer};
pub use dispatcher::{BroadcastDispatcher, DispatchReport, DispatchStats, DispatchTotals};
pub use protocol::{ClientFilter, ClientMessage, ErrorCode, ServerMessage};
pub use registry::{
    Connection, ConnectionKind, ConnectionRegistry, InMemoryRegistry, Outbound, Subscription,
};

use crate::db::models::Identity;
use log::{debug, error, info};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Handles client messages on the event endpoint
#[derive(Clone)]
pub struct SubscriptionService {
    registry: Arc<dyn ConnectionRegistry>,
    authorizer: SubscriptionAuthorizer,
}

impl SubscriptionService {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, authorizer: SubscriptionAuthorizer) -> Self {
        Self {
            registry,
            authorizer,
        }
    }

    /// Handle one text frame. Replies are queued on the connection before
    /// the subscription changes, so `subscribed` always precedes the first
    /// matching `path` message.
    pub async fn handle_text(&self, connection: &Connection, text: &str) {
        let message = match protocol::parse_client_message(text) {
            Ok(message) => message,
            Err(reply) => {
                debug!("Rejected message from {}: {}", connection.id, text);
                connection.send_json(&reply).await;
                return;
            }
        };

        match message {
            ClientMessage::Subscribe { cameras, filters } => {
                self.subscribe(connection, cameras, filters).await
            }
            ClientMessage::Unsubscribe { cameras } => self.unsubscribe(connection, cameras).await,
            ClientMessage::Ping => {
                connection.send_json(&ServerMessage::Pong).await;
            }
        }
    }

    /// Reload the connection's identity so authorization follows account
    /// changes. A gone or disabled account loses its subscription.
    async fn current_identity(&self, connection: &Connection) -> Option<Identity> {
        let stale = connection.identity().await.clone();
        match self.authorizer.refresh(&stale).await {
            Ok(Some(identity)) => {
                connection.set_identity(identity.clone()).await;
                Some(identity)
            }
            Ok(None) => {
                self.registry.clear_subscription(&connection.id).await;
                connection
                    .send_json(&ServerMessage::error(
                        ErrorCode::Unauthorized,
                        "Account is no longer authorized",
                    ))
                    .await;
                None
            }
            Err(e) => {
                error!("Failed to reload identity for {}: {:#}", connection.id, e);
                connection
                    .send_json(&ServerMessage::error(
                        ErrorCode::InternalError,
                        "Failed to resolve subscription",
                    ))
                    .await;
                None
            }
        }
    }

    async fn subscribe(&self, connection: &Connection, cameras: Vec<String>, filter: ClientFilter) {
        let Some(identity) = self.current_identity(connection).await else {
            return;
        };

        let authorization = match self.authorizer.authorize(&identity, &cameras).await {
            Ok(authorization) => authorization,
            Err(e) => {
                error!("Failed to resolve subscription for {}: {:#}", connection.id, e);
                connection
                    .send_json(&ServerMessage::error(
                        ErrorCode::InternalError,
                        "Failed to resolve subscription",
                    ))
                    .await;
                return;
            }
        };

        connection
            .send_json(&ServerMessage::Subscribed {
                cameras: authorization.granted.clone(),
            })
            .await;

        if !authorization.dropped.is_empty() {
            connection
                .send_json(&ServerMessage::Error {
                    error: "Not authorized for some cameras".to_string(),
                    code: ErrorCode::Unauthorized,
                    cameras: Some(authorization.dropped.clone()),
                })
                .await;
        }

        // An empty request stays empty so devices enabled later are picked up;
        // a request that lost every camera must not widen to "all".
        if cameras.is_empty() {
            self.registry
                .set_subscription(&connection.id, BTreeSet::new(), filter)
                .await;
        } else if authorization.granted.is_empty() {
            self.registry.clear_subscription(&connection.id).await;
        } else {
            self.registry
                .set_subscription(
                    &connection.id,
                    authorization.granted.iter().cloned().collect(),
                    filter,
                )
                .await;
        }

        info!(
            "Connection {} subscribed to {} camera(s) ({} dropped)",
            connection.id,
            authorization.granted.len(),
            authorization.dropped.len()
        );
    }

    async fn unsubscribe(&self, connection: &Connection, cameras: Vec<String>) {
        let Some(identity) = self.current_identity(connection).await else {
            return;
        };
        let current = connection.subscription().await;

        let remaining = match (current, cameras.is_empty()) {
            (None, _) | (Some(_), true) => None,
            (Some(subscription), false) => {
                let devices = if subscription.devices.is_empty() {
                    // Subscribed to everything: narrow down from what is visible now
                    match self.authorizer.authorize(&identity, &[]).await {
                        Ok(authorization) => authorization.granted.into_iter().collect(),
                        Err(e) => {
                            error!("Failed to resolve subscription for {}: {:#}", connection.id, e);
                            connection
                                .send_json(&ServerMessage::error(
                                    ErrorCode::InternalError,
                                    "Failed to update subscription",
                                ))
                                .await;
                            return;
                        }
                    }
                } else {
                    subscription.devices
                };

                let devices: BTreeSet<String> = devices
                    .into_iter()
                    .filter(|serial| !cameras.contains(serial))
                    .collect();

                (!devices.is_empty()).then_some((devices, subscription.filter))
            }
        };

        connection
            .send_json(&ServerMessage::Unsubscribed {
                cameras: cameras.clone(),
            })
            .await;

        match remaining {
            Some((devices, filter)) => {
                self.registry
                    .set_subscription(&connection.id, devices, filter)
                    .await;
            }
            None => self.registry.clear_subscription(&connection.id).await,
        }

        debug!("Connection {} unsubscribed from {:?}", connection.id, cameras);
    }
}
