use crate::db::models::{Identity, PathEvent};
use crate::realtime::protocol::ServerMessage;
use crate::realtime::registry::{ConnectionKind, ConnectionRegistry, Outbound, Subscription};
use log::{debug, error, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

/// Whether an event passes a connection's subscription.
///
/// Pure: the decision depends only on the event, the identity and the
/// subscription. Distance here is the raw `(dx, dy)` length, unlike the
/// percentage used at ingestion.
pub fn matches(event: &PathEvent, identity: &Identity, subscription: &Subscription) -> bool {
    let device_ok = if subscription.devices.is_empty() {
        identity.covers(&event.serial)
    } else {
        subscription.devices.contains(&event.serial)
    };
    if !device_ok {
        return false;
    }

    let filter = &subscription.filter;

    if let Some(classes) = &filter.classes {
        if !classes.is_empty() && !classes.iter().any(|c| c == &event.class) {
            return false;
        }
    }

    event.age >= filter.min_age
        && event.dwell >= filter.min_dwell
        && event.displacement() >= filter.min_distance
}

/// Outcome of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: u64,
    /// Subscribed but the event did not match
    pub filtered: u64,
    /// Not subscribed, or not an event connection
    pub skipped: u64,
    /// Queue full or writer gone before sending
    pub dropped: u64,
    /// Send raced with the queue filling or closing
    pub failed: u64,
}

/// Running totals since startup
#[derive(Debug, Default)]
pub struct DispatchStats {
    events: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTotals {
    pub events: u64,
    pub delivered: u64,
    pub filtered: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl DispatchStats {
    fn record(&self, report: &DispatchReport) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.delivered.fetch_add(report.delivered, Ordering::Relaxed);
        self.filtered.fetch_add(report.filtered, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped, Ordering::Relaxed);
        self.failed.fetch_add(report.failed, Ordering::Relaxed);
    }

    pub fn totals(&self) -> DispatchTotals {
        DispatchTotals {
            events: self.events.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Fans accepted events out to matching event connections
pub struct BroadcastDispatcher {
    registry: Arc<dyn ConnectionRegistry>,
    stats: Arc<DispatchStats>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Deliver one event to every matching connection.
    ///
    /// Never waits on a connection's queue, so a slow reader only loses its
    /// own messages.
    pub async fn publish(&self, event: &PathEvent) -> DispatchReport {
        let mut report = DispatchReport::default();

        let text = match serde_json::to_string(&ServerMessage::Path { data: event.clone() }) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize path event {} from {}: {}", event.id, event.serial, e);
                return report;
            }
        };

        for connection in self.registry.all().await {
            if connection.kind == ConnectionKind::Video {
                report.skipped += 1;
                continue;
            }

            let Some(subscription) = connection.subscription().await else {
                report.skipped += 1;
                continue;
            };

            if !connection.is_writable() {
                debug!("Connection {} not writable, dropping event {}", connection.id, event.id);
                report.dropped += 1;
                continue;
            }

            if !matches(event, &*connection.identity().await, &subscription) {
                report.filtered += 1;
                continue;
            }

            match connection.try_send(Outbound::Text(text.clone())) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue full for connection {}", connection.id);
                    report.failed += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} closed during broadcast", connection.id);
                    report.failed += 1;
                }
            }
        }

        self.stats.record(&report);

        debug!(
            "Path event {} from {}: delivered {}, filtered {}, skipped {}, dropped {}, failed {}",
            event.id,
            event.serial,
            report.delivered,
            report.filtered,
            report.skipped,
            report.dropped,
            report.failed
        );

        report
    }
}
