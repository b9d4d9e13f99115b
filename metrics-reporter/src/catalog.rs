//! Which host metrics the reporter cares about and what they map to.

use strum::Display;

use crate::name::{MetricName, REQUEST_TAG};
use crate::record::{LOG_FLUSH_TIME_BASE, REQUEST_TIME_BASE, RawMetricType};

/// Statistic drawn from a sample. Histogram-shaped samples produce one value
/// per percentile stat, everything else produces `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Stat {
    Value,
    Max,
    Mean,
    P50,
    P999,
}

impl Stat {
    pub const PERCENTILES: [Stat; 4] = [Stat::Max, Stat::Mean, Stat::P50, Stat::P999];

    fn percentile_index(self) -> Option<u8> {
        match self {
            Stat::Value => None,
            Stat::Max => Some(0),
            Stat::Mean => Some(1),
            Stat::P50 => Some(2),
            Stat::P999 => Some(3),
        }
    }
}

/// Interest predicate and name-to-kind lookup for host metrics.
pub trait MetricCatalog: Send + Sync {
    /// Kind emitted for `stat` of `name`, if any.
    fn raw_metric_type(&self, name: &MetricName, stat: Stat) -> Option<RawMetricType>;

    fn is_interested(&self, name: &MetricName) -> bool {
        self.raw_metric_type(name, Stat::Value).is_some()
            || self.raw_metric_type(name, Stat::Max).is_some()
    }
}

/// Catalog of the broker metrics understood by downstream load models.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokerCatalog;

fn request_index(name: &MetricName) -> Option<u8> {
    match name.tag(REQUEST_TAG)? {
        "Produce" => Some(0),
        "FetchConsumer" => Some(1),
        "FetchFollower" => Some(2),
        _ => None,
    }
}

fn broker_topic_kind(metric: &str, topic_scoped: bool) -> Option<RawMetricType> {
    use RawMetricType::*;
    let (all, per_topic) = match metric {
        "BytesInPerSec" => (AllTopicBytesIn, TopicBytesIn),
        "BytesOutPerSec" => (AllTopicBytesOut, TopicBytesOut),
        "ReplicationBytesInPerSec" => (AllTopicReplicationBytesIn, TopicReplicationBytesIn),
        "ReplicationBytesOutPerSec" => (AllTopicReplicationBytesOut, TopicReplicationBytesOut),
        "TotalFetchRequestsPerSec" => (AllTopicFetchRequestRate, TopicFetchRequestRate),
        "TotalProduceRequestsPerSec" => (AllTopicProduceRequestRate, TopicProduceRequestRate),
        "MessagesInPerSec" => (AllTopicMessagesInPerSec, TopicMessagesInPerSec),
        _ => return None,
    };
    Some(if topic_scoped { per_topic } else { all })
}

impl MetricCatalog for BrokerCatalog {
    fn raw_metric_type(&self, name: &MetricName, stat: Stat) -> Option<RawMetricType> {
        use RawMetricType::*;
        match (name.group(), name.kind(), name.name(), stat) {
            ("kafka.server", "BrokerTopicMetrics", metric, Stat::Value) => {
                broker_topic_kind(metric, name.topic().is_some())
            }
            ("kafka.server", "KafkaRequestHandlerPool", "RequestHandlerAvgIdlePercent", Stat::Value) => {
                Some(BrokerRequestHandlerAvgIdlePercent)
            }
            ("kafka.network", "RequestChannel", "RequestQueueSize", Stat::Value) => {
                Some(BrokerRequestQueueSize)
            }
            ("kafka.network", "RequestChannel", "ResponseQueueSize", Stat::Value) => {
                Some(BrokerResponseQueueSize)
            }
            ("kafka.network", "RequestMetrics", "RequestsPerSec", Stat::Value) => {
                match request_index(name)? {
                    0 => Some(BrokerProduceRequestRate),
                    1 => Some(BrokerConsumerFetchRequestRate),
                    _ => Some(BrokerFollowerFetchRequestRate),
                }
            }
            ("kafka.network", "RequestMetrics", metric, stat) => {
                let family = match metric {
                    "RequestQueueTimeMs" => 0,
                    "LocalTimeMs" => 1,
                    "TotalTimeMs" => 2,
                    _ => return None,
                };
                let id = REQUEST_TIME_BASE
                    + family * 12
                    + request_index(name)? * 4
                    + stat.percentile_index()?;
                RawMetricType::from_repr(id)
            }
            ("kafka.log", "LogFlushStats", "LogFlushRateAndTimeMs", Stat::Value) => {
                Some(BrokerLogFlushRate)
            }
            ("kafka.log", "LogFlushStats", "LogFlushRateAndTimeMs", stat) => {
                RawMetricType::from_repr(LOG_FLUSH_TIME_BASE + stat.percentile_index()?)
            }
            ("kafka.log", "Log", "Size", Stat::Value) => Some(PartitionSize),
            _ => None,
        }
    }
}
