//! Event ingestion: stream records in, dispatches out
//!
//! ```text
//! EventSource ──next_record──▶ EventIngestor::run()
//!                                   │
//!                          parse + validate (InboundEvent)
//!                                   │
//!                       ──ok──▶ NotificationDispatcher::dispatch()
//!                       ──err─▶ warn, count as dropped, keep going
//! ```
//!
//! Records are processed one at a time. Dispatch only enqueues onto
//! per-connection channels, so this keeps per-user ordering without ever
//! waiting on a socket.

#[cfg(feature = "kafka")]
pub mod kafka;
mod source;

#[cfg(feature = "kafka")]
pub use kafka::KafkaEventSource;
pub use source::{ChannelEventSender, ChannelEventSource, EventSource, StreamRecord};

use crate::core::error::IngestError;
use crate::core::events::InboundEvent;
use crate::dispatch::{DeliveryResult, NotificationDispatcher};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// Consecutive source failures before logging escalates to `error`
pub const SUSTAINED_FAILURE_THRESHOLD: u32 = 5;

const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Delay before retrying after the `attempt`-th consecutive source failure
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX)
}

/// Running counters, shared with the health endpoint
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    source_errors: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSnapshot {
    pub received: u64,
    /// Valid events handed to the dispatcher, delivered or not
    pub dispatched: u64,
    /// Records that failed parsing or validation
    pub dropped: u64,
    pub source_errors: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
        }
    }
}

/// Why [`EventIngestor::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestExit {
    /// Shutdown was signalled
    Shutdown,
    /// The source reported end of stream
    Exhausted,
}

/// Turns stream records into dispatches
pub struct EventIngestor {
    dispatcher: Arc<NotificationDispatcher>,
    stats: Arc<IngestStats>,
}

impl EventIngestor {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, stats: Arc<IngestStats>) -> Self {
        Self { dispatcher, stats }
    }

    pub fn stats(&self) -> IngestSnapshot {
        self.stats.snapshot()
    }

    /// Parse, validate and dispatch one message body
    ///
    /// Bad input is logged and counted; it never escapes as an error.
    pub fn on_raw_message(&self, bytes: &[u8]) -> Option<DeliveryResult> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let event = match InboundEvent::from_slice(bytes) {
            Ok(event) => event,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %e,
                    raw = %String::from_utf8_lossy(bytes),
                    "Dropping invalid order event"
                );
                return None;
            }
        };

        tracing::debug!(
            user_id = %event.user_id,
            order_id = %event.order_id,
            event = %event.kind,
            "Order event received"
        );

        let result = self.dispatcher.dispatch(&event.user_id, &event);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        Some(result)
    }

    /// Handle one stream record
    pub fn on_record(&self, record: &StreamRecord) -> Option<DeliveryResult> {
        match record.payload.as_deref() {
            Some(bytes) if !bytes.is_empty() => self.on_raw_message(bytes),
            _ => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %IngestError::EmptyRecord,
                    partition = record.partition,
                    offset = record.offset,
                    "Dropping invalid order event"
                );
                None
            }
        }
    }

    /// Consume `source` until `shutdown` flips to `true` or the stream ends
    ///
    /// The source is closed before returning in either case.
    pub async fn run<S: EventSource>(
        &self,
        mut source: S,
        mut shutdown: watch::Receiver<bool>,
    ) -> IngestExit {
        tracing::info!("Event ingestor started");

        let mut consecutive_failures: u32 = 0;
        let exit = loop {
            if *shutdown.borrow() {
                break IngestExit::Shutdown;
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break IngestExit::Shutdown,
                next = source.next_record() => next,
            };

            match next {
                Some(Ok(record)) => {
                    consecutive_failures = 0;
                    self.on_record(&record);
                }
                Some(Err(e)) => {
                    consecutive_failures += 1;
                    self.stats.source_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = backoff_delay(consecutive_failures);

                    if consecutive_failures >= SUSTAINED_FAILURE_THRESHOLD {
                        tracing::error!(
                            error = %e,
                            consecutive_failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "Event source keeps failing"
                        );
                    } else {
                        tracing::warn!(
                            error = %e,
                            consecutive_failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "Event source error, backing off"
                        );
                    }

                    tokio::select! {
                        _ = shutdown.changed() => break IngestExit::Shutdown,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tracing::info!("Event source exhausted");
                    break IngestExit::Exhausted;
                }
            }
        };

        source.close().await;
        let stats = self.stats();
        tracing::info!(
            ?exit,
            received = stats.received,
            dispatched = stats.dispatched,
            dropped = stats.dropped,
            source_errors = stats.source_errors,
            "Event ingestor stopped"
        );
        exit
    }
}
