//! Periodic broker metrics reporting onto a partitioned log topic.
//!
//! A [`MetricsReporter`] samples the host's metric registry and the metrics
//! registered through its hooks, converts them into [`MetricRecord`]s and
//! publishes them through a [`RecordProducer`]. On start it can also create
//! the metrics topic or reconcile an existing one.

pub mod admin;
pub mod bootstrap;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod converter;
pub mod cpu;
pub mod error;
pub mod lifecycle;
pub mod memlog;
pub mod name;
pub mod producer;
pub mod publisher;
pub mod record;
pub mod registration;
pub mod registry;
pub mod reporter;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod topic;

pub use admin::{AdminFactory, AlterConfigOp, CreateOutcome, TopicAdmin};
pub use catalog::{BrokerCatalog, MetricCatalog, Stat};
pub use codec::{CdrCodec, MetricCodec};
pub use config::{Properties, ReporterConfig};
pub use error::{
    AdminError, CodecError, ConfigError, ProducerError, RegistryError, ReporterError, TopicSpecError,
};
pub use name::MetricName;
pub use producer::{ProducerFactory, ProducerRecord, RecordMetadata, RecordProducer};
pub use record::{MetricClass, MetricRecord, RawMetricType};
pub use registration::{TrackedMetric, ValueMetric};
pub use registry::{MetricRegistry, MetricSample, RegistryLocator, SharedRegistry};
pub use reporter::{MetricsReporter, ReporterBuilder};
pub use state::LoopState;
pub use topic::TopicSpec;

pub type Result<T> = std::result::Result<T, ReporterError>;

pub trait Builder {
    type Output;
    fn build(self) -> Result<Self::Output>;
}
