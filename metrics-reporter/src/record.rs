//! Canonical metric records published on the metrics topic.

use std::fmt;

use strum::{AsRefStr, Display, EnumIter, FromRepr};

/// Scope of a record, which decides how downstream consumers aggregate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum MetricClass {
    BrokerMetric = 0,
    TopicMetric = 1,
    PartitionMetric = 2,
}

impl MetricClass {
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// First id of the request time block. Ids are laid out as
/// `base + family * 12 + request * 4 + stat`, with families
/// (request queue time, local time, total time), requests
/// (produce, consumer fetch, follower fetch) and stats (max, mean, 50th, 999th).
pub(crate) const REQUEST_TIME_BASE: u8 = 22;
pub(crate) const LOG_FLUSH_TIME_BASE: u8 = 59;

/// Every kind of metric the reporter emits. The discriminant is the stable
/// wire id, so variants must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, FromRepr)]
#[repr(u8)]
pub enum RawMetricType {
    AllTopicBytesIn = 0,
    AllTopicBytesOut,
    TopicBytesIn,
    TopicBytesOut,
    PartitionSize,
    BrokerCpuUtil,
    AllTopicReplicationBytesIn,
    AllTopicReplicationBytesOut,
    TopicReplicationBytesIn,
    TopicReplicationBytesOut,
    AllTopicFetchRequestRate,
    AllTopicProduceRequestRate,
    AllTopicMessagesInPerSec,
    TopicFetchRequestRate,
    TopicProduceRequestRate,
    TopicMessagesInPerSec,
    BrokerProduceRequestRate,
    BrokerConsumerFetchRequestRate,
    BrokerFollowerFetchRequestRate,
    BrokerRequestHandlerAvgIdlePercent,
    BrokerRequestQueueSize,
    BrokerResponseQueueSize,
    BrokerProduceRequestQueueTimeMsMax = REQUEST_TIME_BASE,
    BrokerProduceRequestQueueTimeMsMean,
    BrokerProduceRequestQueueTimeMs50th,
    BrokerProduceRequestQueueTimeMs999th,
    BrokerConsumerFetchRequestQueueTimeMsMax,
    BrokerConsumerFetchRequestQueueTimeMsMean,
    BrokerConsumerFetchRequestQueueTimeMs50th,
    BrokerConsumerFetchRequestQueueTimeMs999th,
    BrokerFollowerFetchRequestQueueTimeMsMax,
    BrokerFollowerFetchRequestQueueTimeMsMean,
    BrokerFollowerFetchRequestQueueTimeMs50th,
    BrokerFollowerFetchRequestQueueTimeMs999th,
    BrokerProduceLocalTimeMsMax,
    BrokerProduceLocalTimeMsMean,
    BrokerProduceLocalTimeMs50th,
    BrokerProduceLocalTimeMs999th,
    BrokerConsumerFetchLocalTimeMsMax,
    BrokerConsumerFetchLocalTimeMsMean,
    BrokerConsumerFetchLocalTimeMs50th,
    BrokerConsumerFetchLocalTimeMs999th,
    BrokerFollowerFetchLocalTimeMsMax,
    BrokerFollowerFetchLocalTimeMsMean,
    BrokerFollowerFetchLocalTimeMs50th,
    BrokerFollowerFetchLocalTimeMs999th,
    BrokerProduceTotalTimeMsMax,
    BrokerProduceTotalTimeMsMean,
    BrokerProduceTotalTimeMs50th,
    BrokerProduceTotalTimeMs999th,
    BrokerConsumerFetchTotalTimeMsMax,
    BrokerConsumerFetchTotalTimeMsMean,
    BrokerConsumerFetchTotalTimeMs50th,
    BrokerConsumerFetchTotalTimeMs999th,
    BrokerFollowerFetchTotalTimeMsMax,
    BrokerFollowerFetchTotalTimeMsMean,
    BrokerFollowerFetchTotalTimeMs50th,
    BrokerFollowerFetchTotalTimeMs999th,
    BrokerLogFlushRate,
    BrokerLogFlushTimeMsMax = LOG_FLUSH_TIME_BASE,
    BrokerLogFlushTimeMsMean,
    BrokerLogFlushTimeMs50th,
    BrokerLogFlushTimeMs999th,
}

impl RawMetricType {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn class(self) -> MetricClass {
        use RawMetricType::*;
        match self {
            TopicBytesIn
            | TopicBytesOut
            | TopicReplicationBytesIn
            | TopicReplicationBytesOut
            | TopicFetchRequestRate
            | TopicProduceRequestRate
            | TopicMessagesInPerSec => MetricClass::TopicMetric,
            PartitionSize => MetricClass::PartitionMetric,
            _ => MetricClass::BrokerMetric,
        }
    }
}

/// The entity a record describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricEntity {
    Broker,
    Topic(String),
    Partition { topic: String, partition: i32 },
}

/// One sample, stamped with broker id and tick time. Built fresh every tick
/// and handed to the publisher by value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    kind: RawMetricType,
    time_ms: i64,
    broker_id: i32,
    value: f64,
    entity: MetricEntity,
}

impl MetricRecord {
    pub fn broker(kind: RawMetricType, time_ms: i64, broker_id: i32, value: f64) -> Self {
        Self {
            kind,
            time_ms,
            broker_id,
            value,
            entity: MetricEntity::Broker,
        }
    }

    pub fn topic(
        kind: RawMetricType,
        time_ms: i64,
        broker_id: i32,
        topic: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            kind,
            time_ms,
            broker_id,
            value,
            entity: MetricEntity::Topic(topic.into()),
        }
    }

    pub fn partition(
        kind: RawMetricType,
        time_ms: i64,
        broker_id: i32,
        topic: impl Into<String>,
        partition: i32,
        value: f64,
    ) -> Self {
        Self {
            kind,
            time_ms,
            broker_id,
            value,
            entity: MetricEntity::Partition {
                topic: topic.into(),
                partition,
            },
        }
    }

    pub fn kind(&self) -> RawMetricType {
        self.kind
    }

    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    pub fn broker_id(&self) -> i32 {
        self.broker_id
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn entity(&self) -> &MetricEntity {
        &self.entity
    }

    pub fn class(&self) -> MetricClass {
        match self.entity {
            MetricEntity::Broker => MetricClass::BrokerMetric,
            MetricEntity::Topic(_) => MetricClass::TopicMetric,
            MetricEntity::Partition { .. } => MetricClass::PartitionMetric,
        }
    }

    /// Topic name for topic-scoped records.
    pub fn entity_key(&self) -> Option<&str> {
        match &self.entity {
            MetricEntity::Topic(topic) => Some(topic),
            _ => None,
        }
    }

    /// Routing key on the metrics topic: the topic name for topic metrics,
    /// the decimal broker id for everything else.
    pub fn partition_key(&self) -> String {
        match self.entity_key() {
            Some(topic) => topic.to_owned(),
            None => self.broker_id.to_string(),
        }
    }
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},time={},brokerId={}",
            self.class(),
            self.kind,
            self.time_ms,
            self.broker_id
        )?;
        match &self.entity {
            MetricEntity::Broker => {}
            MetricEntity::Topic(topic) => write!(f, ",topic={}", topic)?,
            MetricEntity::Partition { topic, partition } => {
                write!(f, ",partition={}-{}", topic, partition)?
            }
        }
        write!(f, ",value={:.3}]", self.value)
    }
}
