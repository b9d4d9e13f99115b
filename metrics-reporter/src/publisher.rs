//! Keyed asynchronous sends of canonical records.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::codec::MetricCodec;
use crate::error::ProducerError;
use crate::producer::{ProducerRecord, RecordProducer};
use crate::record::MetricRecord;
use crate::state::ReporterState;

pub struct Publisher {
    producer: Arc<dyn RecordProducer>,
    codec: Arc<dyn MetricCodec>,
    topic: String,
    state: Arc<ReporterState>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(
        producer: Arc<dyn RecordProducer>,
        codec: Arc<dyn MetricCodec>,
        topic: impl Into<String>,
        state: Arc<ReporterState>,
    ) -> Self {
        Self {
            producer,
            codec,
            topic: topic.into(),
            state,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue one record. Failures are logged and counted, never returned.
    pub fn send(&self, record: MetricRecord) {
        let value = match self.codec.encode(&record) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode {}: {}", record, e);
                self.state.record_send_failure();
                return;
            }
        };
        trace!("Sending {}", record);
        let producer_record = ProducerRecord {
            topic: self.topic.clone(),
            key: record.partition_key(),
            timestamp_ms: record.time_ms(),
            value,
        };
        let state = self.state.clone();
        self.producer.send(
            producer_record,
            Box::new(move |result| {
                if let Err(e) = result {
                    warn!("Failed to send metric {}: {}", record, e);
                    state.record_send_failure();
                }
            }),
        );
    }

    /// Wait for every queued send. An interruption caused by a concurrent
    /// shutdown request counts as success.
    pub fn flush(&self) -> Result<(), ProducerError> {
        match self.producer.flush() {
            Err(ProducerError::Interrupted) if self.state.is_shutdown() => {
                info!("Metrics reporter was interrupted during flush due to shutdown request.");
                Ok(())
            }
            other => other,
        }
    }

    /// Unblock a flush in progress.
    pub fn wakeup(&self) {
        self.producer.wakeup();
    }

    /// Close the producer, once.
    pub fn close(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing metrics producer with a {:?} grace period.", timeout);
        self.producer.close(timeout);
    }
}
