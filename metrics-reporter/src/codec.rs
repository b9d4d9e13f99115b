use cdr::{CdrLe, Infinite};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::record::{MetricEntity, MetricRecord};

pub const WIRE_VERSION: u8 = 0;

/// Turns a record into the bytes stored as the message value.
pub trait MetricCodec: Send + Sync {
    fn encode(&self, record: &MetricRecord) -> Result<Vec<u8>, CodecError>;
}

/// Flat wire layout. `topic` is empty and `partition` is -1 when the record
/// is not scoped to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    pub version: u8,
    pub class_id: u8,
    pub raw_type: u8,
    pub time_ms: i64,
    pub broker_id: i32,
    pub value: f64,
    pub topic: String,
    pub partition: i32,
}

impl From<&MetricRecord> for WireRecord {
    fn from(record: &MetricRecord) -> Self {
        let (topic, partition) = match record.entity() {
            MetricEntity::Broker => (String::new(), -1),
            MetricEntity::Topic(topic) => (topic.clone(), -1),
            MetricEntity::Partition { topic, partition } => (topic.clone(), *partition),
        };
        Self {
            version: WIRE_VERSION,
            class_id: record.class().id(),
            raw_type: record.kind().id(),
            time_ms: record.time_ms(),
            broker_id: record.broker_id(),
            value: record.value(),
            topic,
            partition,
        }
    }
}

/// Little-endian CDR encoding of [`WireRecord`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CdrCodec;

impl CdrCodec {
    pub fn decode(bytes: &[u8]) -> Result<WireRecord, CodecError> {
        cdr::deserialize::<WireRecord>(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

impl MetricCodec for CdrCodec {
    fn encode(&self, record: &MetricRecord) -> Result<Vec<u8>, CodecError> {
        cdr::serialize::<_, _, CdrLe>(&WireRecord::from(record), Infinite)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}
