//! Stream sources the ingestor can consume

use crate::core::error::SourceError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One message taken off the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Message body; tombstones and empty messages carry none
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

impl StreamRecord {
    pub fn new(payload: impl Into<Vec<u8>>, partition: i32, offset: i64) -> Self {
        Self {
            payload: Some(payload.into()),
            partition,
            offset,
        }
    }
}

/// A single-topic stream of order events
#[async_trait]
pub trait EventSource: Send {
    /// Next record, a transport error, or `None` once the stream has ended
    ///
    /// Must be cancel-safe: the ingestor races it against shutdown.
    async fn next_record(&mut self) -> Option<Result<StreamRecord, SourceError>>;

    /// Commit progress and release the stream
    async fn close(&mut self) {}
}

/// In-process source fed through an mpsc channel
///
/// Used when the notifier is embedded next to the producer, and by tests.
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Result<Vec<u8>, SourceError>>,
    next_offset: i64,
}

/// Producer half of a [`ChannelEventSource`]
pub type ChannelEventSender = mpsc::Sender<Result<Vec<u8>, SourceError>>;

impl ChannelEventSource {
    pub fn new(capacity: usize) -> (ChannelEventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            tx,
            Self {
                rx,
                next_offset: 0,
            },
        )
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_record(&mut self) -> Option<Result<StreamRecord, SourceError>> {
        let item = self.rx.recv().await?;
        Some(item.map(|payload| {
            let record = StreamRecord::new(payload, 0, self.next_offset);
            self.next_offset += 1;
            record
        }))
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
