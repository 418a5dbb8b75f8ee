//! Notification forwarding.
//!
//! The manager emits events synchronously from inside request handling.
//! [`ChannelSink`] hands them to a bounded tokio channel without waiting;
//! [`forward_events`] drains the channel and delivers each event to the
//! notification boundary, which for now is the structured log.

use filing_core::{EventSink, FilingEvent};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

/// Sink that enqueues events for the forwarder. Never blocks.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<FilingEvent>,
}

/// Bounded event channel of `capacity` events.
pub fn channel(capacity: usize) -> (ChannelSink, Receiver<FilingEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelSink { tx }, rx)
}

impl EventSink for ChannelSink {
    fn emit(&self, event: FilingEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    event = event.name(),
                    session = %event.session_id(),
                    "notification channel full, event dropped"
                );
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(
                    event = event.name(),
                    session = %event.session_id(),
                    "notification forwarder stopped, event dropped"
                );
            }
        }
    }
}

/// Deliver events until every sender is gone.
pub async fn forward_events(mut rx: Receiver<FilingEvent>) {
    while let Some(event) = rx.recv().await {
        deliver(&event);
    }
    tracing::debug!("notification forwarder finished");
}

/// Sink for one-shot CLI commands: delivers inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: FilingEvent) {
        deliver(&event);
    }
}

fn deliver(event: &FilingEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => tracing::info!(
            target: "filing::notify",
            event = event.name(),
            session = %event.session_id(),
            %payload,
            "notification"
        ),
        Err(e) => tracing::warn!(event = event.name(), error = %e, "unserializable event"),
    }
}
