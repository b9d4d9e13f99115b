//! Reporter configuration read from the host's flat property map.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bootstrap::bootstrap_servers;
use crate::error::{ConfigError, TopicSpecError};
use crate::topic::TopicSpec;

/// Prefix of every reporter key. Keys under it that the reporter does not
/// own are passed to the publishing client with the prefix stripped.
pub const PREFIX: &str = "metrics.reporter.";

pub const BROKER_ID: &str = "broker.id";
pub const LISTENERS: &str = "listeners";
pub const PORT: &str = "port";

pub const TOPIC: &str = "metrics.reporter.topic";
pub const REPORTING_INTERVAL_MS: &str = "metrics.reporter.metrics.reporting.interval.ms";
pub const KUBERNETES_MODE: &str = "metrics.reporter.kubernetes.mode";
pub const TOPIC_AUTO_CREATE: &str = "metrics.reporter.topic.auto.create";
pub const TOPIC_AUTO_CREATE_TIMEOUT_MS: &str = "metrics.reporter.topic.auto.create.timeout.ms";
pub const TOPIC_AUTO_CREATE_RETRIES: &str = "metrics.reporter.topic.auto.create.retries";
pub const TOPIC_NUM_PARTITIONS: &str = "metrics.reporter.topic.num.partitions";
pub const TOPIC_REPLICATION_FACTOR: &str = "metrics.reporter.topic.replication.factor";
pub const TOPIC_MIN_INSYNC_REPLICAS: &str = "metrics.reporter.topic.min.insync.replicas";
pub const TOPIC_RETENTION_MS: &str = "metrics.reporter.topic.retention.ms";
pub const CREATE_RETRIES: &str = "metrics.reporter.create.retries";
pub const LINGER_MS: &str = "metrics.reporter.linger.ms";
pub const BATCH_SIZE: &str = "metrics.reporter.batch.size";

/// Reporter-owned keys, never forwarded to the client.
const REPORTER_KEYS: &[&str] = &[
    TOPIC,
    REPORTING_INTERVAL_MS,
    KUBERNETES_MODE,
    TOPIC_AUTO_CREATE,
    TOPIC_AUTO_CREATE_TIMEOUT_MS,
    TOPIC_AUTO_CREATE_RETRIES,
    TOPIC_NUM_PARTITIONS,
    TOPIC_REPLICATION_FACTOR,
    TOPIC_MIN_INSYNC_REPLICAS,
    TOPIC_RETENTION_MS,
    CREATE_RETRIES,
    LINGER_MS,
    BATCH_SIZE,
];

pub const DEFAULT_TOPIC: &str = "__BrokerMetrics";
pub const DEFAULT_REPORTING_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_TOPIC_AUTO_CREATE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TOPIC_AUTO_CREATE_RETRIES: u32 = 5;
pub const DEFAULT_TOPIC_RETENTION_MS: i64 = 5 * 60 * 60 * 1000;
pub const DEFAULT_CREATE_RETRIES: u32 = 2;
pub const DEFAULT_LINGER_MS: u64 = 500;
pub const DEFAULT_BATCH_SIZE: u32 = 800 * 1000;
pub const DEFAULT_SECURITY_PROTOCOL: &str = "PLAINTEXT";
pub const DEFAULT_CLIENT_ID: &str = "BrokerMetricsReporter";

/// Client property names.
pub mod client {
    pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";
    pub const SECURITY_PROTOCOL: &str = "security.protocol";
    pub const CLIENT_ID: &str = "client.id";
    pub const LINGER_MS: &str = "linger.ms";
    pub const BATCH_SIZE: &str = "batch.size";
    pub const RETRIES: &str = "retries";
    pub const COMPRESSION_TYPE: &str = "compression.type";
    pub const ACKS: &str = "acks";
    pub const SSL_PREFIX: &str = "ssl.";
}

/// Flat string property map, as handed over by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert<K: Into<String>, V: ToString>(&mut self, key: K, value: V) -> Option<String> {
        self.0.insert(key.into(), value.to_string())
    }

    /// Set `key` unless already present. Returns whether the value was set.
    pub fn set_if_absent<K: Into<String>, V: ToString>(&mut self, key: K, value: V) -> bool {
        let key = key.into();
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.to_string());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse `key`, `Ok(None)` when absent.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)
            .map(|value| {
                value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                    key: key.to_owned(),
                    value: value.to_owned(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    pub fn require<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.parse(key)?
            .ok_or_else(|| ConfigError::Missing(key.to_owned()))
    }

    /// Entries under `prefix`, with the prefix stripped.
    pub fn strip_prefix(&self, prefix: &str) -> Properties {
        self.0
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|k| (k.to_owned(), v.clone())))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Typed view of everything the reporter reads at configure time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterConfig {
    pub broker_id: i32,
    pub topic: String,
    pub reporting_interval: Duration,
    pub kubernetes_mode: bool,
    pub topic_auto_create: bool,
    pub topic_auto_create_timeout: Duration,
    pub topic_auto_create_retries: u32,
    pub topic_num_partitions: i32,
    pub topic_replication_factor: i16,
    pub topic_min_insync_replicas: i16,
    pub topic_retention_ms: i64,
    pub create_retries: u32,
    /// Properties for the publishing client, defaults applied.
    pub client: Properties,
}

impl ReporterConfig {
    pub fn from_props(props: &Properties) -> Result<Self, ConfigError> {
        let client = client_properties(props)?;
        Ok(Self {
            broker_id: props.require(BROKER_ID)?,
            topic: props.parse_or(TOPIC, DEFAULT_TOPIC.to_owned())?,
            reporting_interval: Duration::from_millis(
                props.parse_or(REPORTING_INTERVAL_MS, DEFAULT_REPORTING_INTERVAL_MS)?,
            ),
            kubernetes_mode: props.parse_or(KUBERNETES_MODE, false)?,
            topic_auto_create: props.parse_or(TOPIC_AUTO_CREATE, false)?,
            topic_auto_create_timeout: Duration::from_millis(
                props.parse_or(TOPIC_AUTO_CREATE_TIMEOUT_MS, DEFAULT_TOPIC_AUTO_CREATE_TIMEOUT_MS)?,
            ),
            topic_auto_create_retries: props
                .parse_or(TOPIC_AUTO_CREATE_RETRIES, DEFAULT_TOPIC_AUTO_CREATE_RETRIES)?,
            topic_num_partitions: props.parse_or(TOPIC_NUM_PARTITIONS, -1)?,
            topic_replication_factor: props.parse_or(TOPIC_REPLICATION_FACTOR, -1)?,
            topic_min_insync_replicas: props.parse_or(TOPIC_MIN_INSYNC_REPLICAS, -1)?,
            topic_retention_ms: props.parse_or(TOPIC_RETENTION_MS, DEFAULT_TOPIC_RETENTION_MS)?,
            create_retries: props.parse_or(CREATE_RETRIES, DEFAULT_CREATE_RETRIES)?,
            client,
        })
    }

    /// Desired state of the metrics topic. A non-positive min in-sync
    /// replicas setting means "use the cluster default".
    pub fn topic_spec(&self) -> Result<TopicSpec, TopicSpecError> {
        let min_insync = (self.topic_min_insync_replicas > 0).then_some(self.topic_min_insync_replicas);
        TopicSpec::new(
            self.topic.clone(),
            self.topic_num_partitions,
            self.topic_replication_factor,
            self.topic_retention_ms,
            min_insync,
        )
    }

    /// Client properties plus the reporter's `ssl.*` settings, for the
    /// admin client.
    pub fn admin_properties(&self, props: &Properties) -> Properties {
        let mut admin = self.client.clone();
        let ssl_prefix = format!("{}{}", PREFIX, client::SSL_PREFIX);
        for (key, value) in props.strip_prefix(&ssl_prefix).iter() {
            admin.set_if_absent(format!("{}{}", client::SSL_PREFIX, key), value);
        }
        admin
    }
}

fn client_properties(props: &Properties) -> Result<Properties, ConfigError> {
    let mut client_props: Properties = props
        .iter()
        .filter(|(k, _)| !REPORTER_KEYS.contains(k))
        .filter_map(|(k, v)| k.strip_prefix(PREFIX).map(|k| (k.to_owned(), v.to_owned())))
        .collect();

    if !client_props.contains_key(client::BOOTSTRAP_SERVERS) {
        let servers = bootstrap_servers(props.get(LISTENERS), props.get(PORT));
        info!(
            "Using default value of {} for {}{}",
            servers,
            PREFIX,
            client::BOOTSTRAP_SERVERS
        );
        client_props.insert(client::BOOTSTRAP_SERVERS, servers);
    }
    if client_props.set_if_absent(client::SECURITY_PROTOCOL, DEFAULT_SECURITY_PROTOCOL) {
        info!(
            "Using default value of {} for {}{}",
            DEFAULT_SECURITY_PROTOCOL,
            PREFIX,
            client::SECURITY_PROTOCOL
        );
    }
    client_props.set_if_absent(client::CLIENT_ID, DEFAULT_CLIENT_ID);
    client_props.set_if_absent(client::LINGER_MS, props.parse_or(LINGER_MS, DEFAULT_LINGER_MS)?);
    client_props.set_if_absent(client::BATCH_SIZE, props.parse_or(BATCH_SIZE, DEFAULT_BATCH_SIZE)?);
    client_props.set_if_absent(client::RETRIES, 5);
    client_props.set_if_absent(client::COMPRESSION_TYPE, "gzip");
    client_props.set_if_absent(client::ACKS, "all");
    Ok(client_props)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Properties {
        Properties::new().with(BROKER_ID, 7)
    }

    #[test]
    fn test_defaults() {
        let config = ReporterConfig::from_props(&base()).unwrap();
        assert_eq!(config.broker_id, 7);
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert_eq!(config.reporting_interval, Duration::from_secs(60));
        assert!(!config.topic_auto_create);
        assert_eq!(config.topic_auto_create_retries, 5);
        assert_eq!(config.create_retries, 2);
        assert_eq!(config.client.get(client::BOOTSTRAP_SERVERS), Some("localhost:9092"));
        assert_eq!(config.client.get(client::SECURITY_PROTOCOL), Some("PLAINTEXT"));
        assert_eq!(config.client.get(client::CLIENT_ID), Some(DEFAULT_CLIENT_ID));
        assert_eq!(config.client.get(client::LINGER_MS), Some("500"));
        assert_eq!(config.client.get(client::BATCH_SIZE), Some("800000"));
        assert_eq!(config.client.get(client::ACKS), Some("all"));
        assert_eq!(config.client.get(client::COMPRESSION_TYPE), Some("gzip"));
    }

    #[test]
    fn test_broker_id_is_required() {
        assert_eq!(
            ReporterConfig::from_props(&Properties::new()),
            Err(ConfigError::Missing(BROKER_ID.to_owned()))
        );
    }

    #[test]
    fn test_malformed_value() {
        let props = base().with(REPORTING_INTERVAL_MS, "soon");
        assert!(matches!(
            ReporterConfig::from_props(&props),
            Err(ConfigError::Invalid { key, .. }) if key == REPORTING_INTERVAL_MS
        ));
    }

    #[test]
    fn test_client_overrides_and_passthrough() {
        let props = base()
            .with(LISTENERS, "SSL://broker-1:9093")
            .with("metrics.reporter.acks", "1")
            .with("metrics.reporter.max.block.ms", "100")
            .with(TOPIC_NUM_PARTITIONS, 4);
        let config = ReporterConfig::from_props(&props).unwrap();
        assert_eq!(config.client.get(client::BOOTSTRAP_SERVERS), Some("broker-1:9093"));
        assert_eq!(config.client.get(client::ACKS), Some("1"));
        assert_eq!(config.client.get("max.block.ms"), Some("100"));
        assert!(!config.client.contains_key("topic.num.partitions"));
        assert_eq!(config.topic_num_partitions, 4);
    }

    #[test]
    fn test_explicit_bootstrap_servers_win() {
        let props = base()
            .with(LISTENERS, "PLAINTEXT://ignored:1")
            .with("metrics.reporter.bootstrap.servers", "a:1,b:2");
        let config = ReporterConfig::from_props(&props).unwrap();
        assert_eq!(config.client.get(client::BOOTSTRAP_SERVERS), Some("a:1,b:2"));
    }

    #[test]
    fn test_admin_properties_carry_ssl() {
        let props = base()
            .with("metrics.reporter.ssl.truststore.location", "/etc/ts.jks")
            .with("metrics.reporter.security.protocol", "SSL");
        let config = ReporterConfig::from_props(&props).unwrap();
        let admin = config.admin_properties(&props);
        assert_eq!(admin.get("ssl.truststore.location"), Some("/etc/ts.jks"));
        assert_eq!(admin.get(client::SECURITY_PROTOCOL), Some("SSL"));
    }

    #[test]
    fn test_topic_spec_ignores_unset_min_insync() {
        let props = base()
            .with(TOPIC_NUM_PARTITIONS, 3)
            .with(TOPIC_REPLICATION_FACTOR, 2);
        let spec = ReporterConfig::from_props(&props).unwrap().topic_spec().unwrap();
        assert_eq!(spec.min_insync_replicas(), None);
    }

    #[test]
    fn test_topic_spec_requires_explicit_sizes() {
        let config = ReporterConfig::from_props(&base()).unwrap();
        assert!(matches!(
            config.topic_spec(),
            Err(TopicSpecError::NotPositive { .. })
        ));
    }
}
