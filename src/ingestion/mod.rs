//! Device path event ingestion: decode, look up, filter, then persist and
//! broadcast concurrently.

pub mod filter;

use crate::db::models::PathEvent;
use crate::messaging::{decoder, DecodeError, DeliveryHandler};
use crate::realtime::BroadcastDispatcher;
use crate::services::{DeviceDirectory, EventStore};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to a single delivery
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Stored (when `stored`) and handed to the dispatcher
    Accepted { stored: bool, delivered: u64 },
    Rejected(filter::Rejection),
    UnknownDevice(String),
    DisabledDevice(String),
    Malformed(DecodeError),
}

#[derive(Debug, Default)]
pub struct IngestionStats {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    unknown_device: AtomicU64,
    malformed: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionTotals {
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub unknown_device: u64,
    pub malformed: u64,
    pub store_failures: u64,
}

impl IngestionStats {
    pub fn totals(&self) -> IngestionTotals {
        IngestionTotals {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            unknown_device: self.unknown_device.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Turns raw broker deliveries into stored and broadcast path events
pub struct IngestionPipeline {
    path_topic: String,
    directory: Arc<dyn DeviceDirectory>,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<BroadcastDispatcher>,
    stats: Arc<IngestionStats>,
}

impl IngestionPipeline {
    pub fn new(
        path_topic: impl Into<String>,
        directory: Arc<dyn DeviceDirectory>,
        store: Arc<dyn EventStore>,
        dispatcher: Arc<BroadcastDispatcher>,
    ) -> Self {
        Self {
            path_topic: path_topic.into(),
            directory,
            store,
            dispatcher,
            stats: Arc::new(IngestionStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<IngestionStats> {
        self.stats.clone()
    }

    /// Process one delivery. Only a failed device lookup is an error; every
    /// other outcome is a normal result.
    pub async fn ingest(&self, routing_key: &str, payload: &[u8]) -> Result<IngestOutcome> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let event = match decoder::decode(routing_key, payload, &self.path_topic) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed delivery on {}: {}", routing_key, e);
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return Ok(IngestOutcome::Malformed(e));
            }
        };

        let Some(device) = self.directory.device(&event.serial).await? else {
            debug!("Dropping event from unknown device {}", event.serial);
            self.stats.unknown_device.fetch_add(1, Ordering::Relaxed);
            return Ok(IngestOutcome::UnknownDevice(event.serial));
        };

        if !device.enabled {
            debug!("Dropping event from disabled device {}", event.serial);
            self.stats.unknown_device.fetch_add(1, Ordering::Relaxed);
            return Ok(IngestOutcome::DisabledDevice(event.serial));
        }

        if let Err(rejection) = filter::evaluate(&event, &device.filter) {
            debug!(
                "Rejected {} {} from {}: {}",
                event.class, event.id, event.serial, rejection
            );
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(IngestOutcome::Rejected(rejection));
        }

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(self.accept(&event).await)
    }

    async fn accept(&self, event: &PathEvent) -> IngestOutcome {
        let (stored, report) = tokio::join!(self.store.store(event), self.dispatcher.publish(event));

        let stored = match stored {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to store path event {} from {}: {:#}",
                    event.id, event.serial, e
                );
                self.stats.store_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        };

        IngestOutcome::Accepted {
            stored,
            delivered: report.delivered,
        }
    }
}

#[async_trait]
impl DeliveryHandler for IngestionPipeline {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.ingest(routing_key, payload).await.map(|_| ())
    }
}
