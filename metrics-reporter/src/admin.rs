//! Contract of the administrative client used to provision the metrics topic.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::Properties;
use crate::error::AdminError;
use crate::topic::TopicSpec;

/// Outcome of a create request. An existing topic is expected on every
/// restart and is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// A SET operation for one topic config key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterConfigOp {
    pub key: String,
    pub value: String,
}

impl AlterConfigOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Every call waits at most `timeout` for the cluster to answer.
pub trait TopicAdmin: Send {
    fn create_topic(&self, spec: &TopicSpec, timeout: Duration) -> Result<CreateOutcome, AdminError>;

    fn describe_configs(&self, topic: &str, timeout: Duration) -> Result<BTreeMap<String, String>, AdminError>;

    fn incremental_alter_configs(
        &self,
        topic: &str,
        ops: &[AlterConfigOp],
        timeout: Duration,
    ) -> Result<(), AdminError>;

    fn partition_count(&self, topic: &str, timeout: Duration) -> Result<usize, AdminError>;

    /// Grow `topic` to `total` partitions.
    fn create_partitions(&self, topic: &str, total: usize, timeout: Duration) -> Result<(), AdminError>;

    fn close(&self, timeout: Duration);
}

pub trait AdminFactory: Send + Sync {
    fn create(&self, config: &Properties) -> Result<Box<dyn TopicAdmin>, AdminError>;
}
