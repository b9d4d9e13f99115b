//! Contract of the publishing client the reporter sends records through.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Properties;
use crate::error::ProducerError;

/// A keyed, timestamped message bound for one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerRecord {
    pub topic: String,
    pub key: String,
    pub timestamp_ms: i64,
    pub value: Vec<u8>,
}

/// Where an acknowledged record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: u64,
    pub timestamp_ms: i64,
}

/// Invoked exactly once per send, on the producer's own thread.
pub type DeliveryCallback = Box<dyn FnOnce(Result<RecordMetadata, ProducerError>) + Send + 'static>;

pub trait RecordProducer: Send + Sync {
    /// Queue `record` for delivery without blocking on the acknowledgement.
    fn send(&self, record: ProducerRecord, on_delivery: DeliveryCallback);

    /// Block until every queued record has completed, or until
    /// [`wakeup`](RecordProducer::wakeup) is called, in which case
    /// `ProducerError::Interrupted` is returned.
    fn flush(&self) -> Result<(), ProducerError>;

    /// Abort an in-progress or the next flush.
    fn wakeup(&self);

    /// Let in-flight sends finish for at most `timeout`, then fail the rest.
    fn close(&self, timeout: Duration);
}

/// Builds publishing clients from client properties.
pub trait ProducerFactory: Send + Sync {
    fn create(&self, config: &Properties) -> Result<Arc<dyn RecordProducer>, ProducerError>;
}
