use std::collections::BTreeMap;
use std::fmt;

pub const TOPIC_TAG: &str = "topic";
pub const PARTITION_TAG: &str = "partition";
pub const REQUEST_TAG: &str = "request";

/// Identity of a host metric, shaped like a JMX object name:
/// `group:type=Kind,name=Name[,tag=value...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName {
    group: String,
    kind: String,
    name: String,
    tags: BTreeMap<String, String>,
}

impl MetricName {
    pub fn new(group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            name: name.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.with_tag(TOPIC_TAG, topic)
    }

    pub fn with_partition(self, partition: i32) -> Self {
        self.with_tag(PARTITION_TAG, partition.to_string())
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn topic(&self) -> Option<&str> {
        self.tag(TOPIC_TAG)
    }

    pub fn partition(&self) -> Option<i32> {
        self.tag(PARTITION_TAG).and_then(|p| p.parse().ok())
    }

    /// Parse `group:type=Kind,name=Name,k=v`. Returns `None` when the group,
    /// `type` or `name` is missing.
    pub fn parse(mbean: &str) -> Option<Self> {
        let (group, props) = mbean.split_once(':')?;
        if group.is_empty() {
            return None;
        }
        let mut kind = None;
        let mut name = None;
        let mut tags = BTreeMap::new();
        for pair in props.split(',') {
            let (key, value) = pair.split_once('=')?;
            match key.trim() {
                "type" => kind = Some(value.trim().to_owned()),
                "name" => name = Some(value.trim().to_owned()),
                key => {
                    tags.insert(key.to_owned(), value.trim().to_owned());
                }
            }
        }
        Some(Self {
            group: group.to_owned(),
            kind: kind?,
            name: name?,
            tags,
        })
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:type={},name={}", self.group, self.kind, self.name)?;
        for (key, value) in &self.tags {
            write!(f, ",{}={}", key, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_orders_tags_after_type_and_name() {
        let name = MetricName::new("kafka.server", "BrokerTopicMetrics", "BytesInPerSec")
            .with_topic("orders")
            .with_tag("client", "a");
        assert_eq!(
            name.to_string(),
            "kafka.server:type=BrokerTopicMetrics,name=BytesInPerSec,client=a,topic=orders"
        );
    }

    #[test]
    fn test_parse_mbean() {
        let name = MetricName::parse("kafka.log:type=Log,name=Size,topic=t1,partition=3").unwrap();
        assert_eq!(name.group(), "kafka.log");
        assert_eq!(name.kind(), "Log");
        assert_eq!(name.name(), "Size");
        assert_eq!(name.topic(), Some("t1"));
        assert_eq!(name.partition(), Some(3));
    }

    #[test]
    fn test_parse_rejects_incomplete_names() {
        assert!(MetricName::parse("kafka.log").is_none());
        assert!(MetricName::parse(":type=Log,name=Size").is_none());
        assert!(MetricName::parse("kafka.log:name=Size").is_none());
        assert!(MetricName::parse("kafka.log:type=Log,name").is_none());
    }

    #[test]
    fn test_partition_tag_must_be_numeric() {
        let name = MetricName::new("kafka.log", "Log", "Size").with_tag(PARTITION_TAG, "x");
        assert_eq!(name.partition(), None);
    }
}
