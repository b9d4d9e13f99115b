use std::time::Duration;

use thiserror::Error;

/// Errors raised while reading reporter or client properties.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required config `{0}`")]
    Missing(String),
    #[error("invalid value `{value}` for config `{key}`: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("no resolvable bootstrap address in `{0}`")]
    UnresolvedBootstrap(String),
}

/// The desired topic state could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicSpecError {
    #[error("topic name must not be empty")]
    EmptyName,
    #[error(
        "the topic configuration must explicitly set the replication factor and the number of \
         partitions (partitions = {partitions}, replication factor = {replication_factor})"
    )]
    NotPositive {
        partitions: i32,
        replication_factor: i16,
    },
    #[error("min in-sync replicas must be positive when set, got {0}")]
    InvalidMinInsync(i16),
    #[error(
        "the configured topic replication factor ({replication_factor}) must be greater than or \
         equal to the configured topic minimum in-sync replicas ({min_insync_replicas})"
    )]
    MinInsyncExceedsReplication {
        replication_factor: i16,
        min_insync_replicas: i16,
    },
}

/// Failures of the publishing client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("invalid producer configuration")]
    Config(#[source] ConfigError),
    #[error("interrupted while waiting for in-flight sends")]
    Interrupted,
    #[error("producer is closed")]
    Closed,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
    #[error("{0}")]
    Other(String),
}

/// Failures of the administrative client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("interrupted")]
    Interrupted,
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    #[error("partition reassignment in progress for `{0}`")]
    ReassignmentInProgress(String),
    #[error("invalid partition count: {0}")]
    InvalidPartitions(String),
    #[error("admin client is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to encode metric record: {0}")]
    Encode(String),
    #[error("failed to decode metric record: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("failed to find a metric registry, tried: {}", .tried.join(", "))]
    NotFound { tried: Vec<String> },
}

/// Top-level error of the reporter.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    TopicSpec(#[from] TopicSpecError),
    #[error(transparent)]
    Producer(#[from] ProducerError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn the reporter thread")]
    Spawn(#[source] std::io::Error),
    #[error("reporting iteration panicked: {0}")]
    Panicked(String),
}
