use std::collections::BTreeMap;

use crate::error::TopicSpecError;

pub const RETENTION_MS_CONFIG: &str = "retention.ms";
pub const CLEANUP_POLICY_CONFIG: &str = "cleanup.policy";
pub const MIN_INSYNC_REPLICAS_CONFIG: &str = "min.insync.replicas";
pub const CLEANUP_POLICY_DELETE: &str = "delete";

/// Desired state of the metrics topic. Validated on construction and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    name: String,
    partitions: i32,
    replication_factor: i16,
    retention_ms: i64,
    min_insync_replicas: Option<i16>,
}

impl TopicSpec {
    pub fn new(
        name: impl Into<String>,
        partitions: i32,
        replication_factor: i16,
        retention_ms: i64,
        min_insync_replicas: Option<i16>,
    ) -> Result<Self, TopicSpecError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TopicSpecError::EmptyName);
        }
        if partitions <= 0 || replication_factor <= 0 {
            return Err(TopicSpecError::NotPositive {
                partitions,
                replication_factor,
            });
        }
        if let Some(min_insync) = min_insync_replicas {
            if min_insync <= 0 {
                return Err(TopicSpecError::InvalidMinInsync(min_insync));
            }
            if min_insync > replication_factor {
                return Err(TopicSpecError::MinInsyncExceedsReplication {
                    replication_factor,
                    min_insync_replicas: min_insync,
                });
            }
        }
        Ok(Self {
            name,
            partitions,
            replication_factor,
            retention_ms,
            min_insync_replicas,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partitions(&self) -> i32 {
        self.partitions
    }

    pub fn replication_factor(&self) -> i16 {
        self.replication_factor
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_ms
    }

    pub fn cleanup_policy(&self) -> &'static str {
        CLEANUP_POLICY_DELETE
    }

    pub fn min_insync_replicas(&self) -> Option<i16> {
        self.min_insync_replicas
    }

    /// Configs the topic is created with.
    pub fn configs(&self) -> BTreeMap<String, String> {
        let mut configs: BTreeMap<String, String> = self
            .reconciled_configs()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        if let Some(min_insync) = self.min_insync_replicas {
            configs.insert(MIN_INSYNC_REPLICAS_CONFIG.to_owned(), min_insync.to_string());
        }
        configs
    }

    /// The only configs kept in sync on an existing topic.
    pub fn reconciled_configs(&self) -> [(&'static str, String); 2] {
        [
            (RETENTION_MS_CONFIG, self.retention_ms.to_string()),
            (CLEANUP_POLICY_CONFIG, CLEANUP_POLICY_DELETE.to_owned()),
        ]
    }
}
