//! In-process broadcast of tag notifications.
//!
//! Every notification gets a hub-wide sequence number and a wall-clock stamp
//! before it is handed to the subscribers. Publishing with nobody listening
//! is not an error.

use crate::metrics::{NOTIFICATIONS_PUBLISHED, SINK_FAILURES};
use crate::protocol::NotificationMsg;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tag_core::{Notification, Notifier, SinkError};
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 256;

pub(crate) fn unix_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Cloneable handle; clones publish into the same channel.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<NotificationMsg>,
    sequence: Arc<AtomicU64>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Subscribers falling more than `capacity` messages behind lose the
    /// oldest ones.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationMsg> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an already encoded event.
    pub fn publish(&self, event: &str, data: serde_json::Value) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = NotificationMsg::new(sequence, unix_us(), event, data);
        NOTIFICATIONS_PUBLISHED.with_label_values(&[event]).inc();
        if self.sender.send(msg).is_err() {
            trace!(event, sequence, "no notification subscribers");
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for NotificationHub {
    fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        let data = serde_json::to_value(notification).map_err(|e| {
            SINK_FAILURES.with_label_values(&["notifier"]).inc();
            SinkError::Encode(e.to_string())
        })?;
        self.publish(notification.event(), data);
        Ok(())
    }
}
