mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics_reporter::config;
use metrics_reporter::lifecycle::{ProvisionOutcome, Reconciliation, TopicProvisioner};
use metrics_reporter::memlog::{AdminOp, MemoryAdmin, MemoryCluster, MemoryProducerFactory};
use metrics_reporter::retry::Backoff;
use metrics_reporter::topic::{CLEANUP_POLICY_CONFIG, RETENTION_MS_CONFIG};
use metrics_reporter::{Builder, LoopState, MetricsReporter, TopicSpec};

use crate::common::*;

fn spec(partitions: i32) -> TopicSpec {
    TopicSpec::new(TOPIC, partitions, 1, 18_000_000, None).unwrap()
}

fn provisioner(admin: &MemoryAdmin, spec: TopicSpec) -> TopicProvisioner {
    TopicProvisioner::new(Box::new(admin.clone()), spec).with_backoff(Backoff::none())
}

fn existing_topic(cluster: &MemoryCluster, partitions: usize, retention_ms: &str) {
    cluster.create_topic(
        TOPIC,
        partitions,
        BTreeMap::from([(RETENTION_MS_CONFIG.to_owned(), retention_ms.to_owned())]),
    );
}

#[test]
fn test_creates_missing_topic() {
    let cluster = MemoryCluster::new();
    let admin = MemoryAdmin::new(cluster.clone());
    assert_eq!(provisioner(&admin, spec(3)).provision(), ProvisionOutcome::Created);
    assert_eq!(cluster.partition_count(TOPIC), Some(3));
    assert!(admin.is_closed());
    assert_eq!(admin.calls(AdminOp::DescribeConfigs), 0);
}

#[test]
fn test_reconcile_is_idempotent() {
    let cluster = MemoryCluster::new();
    existing_topic(&cluster, 6, "18000000");
    let admin = MemoryAdmin::new(cluster.clone());

    assert_eq!(
        provisioner(&admin, spec(6)).provision(),
        ProvisionOutcome::Reconciled(Reconciliation::default())
    );
    assert_eq!(admin.calls(AdminOp::DescribeConfigs), 1);
    assert_eq!(admin.calls(AdminOp::AlterConfigs), 0);
    assert_eq!(admin.calls(AdminOp::CreatePartitions), 0);
}

#[test]
fn test_reconcile_alters_only_drifted_configs() {
    let cluster = MemoryCluster::new();
    existing_topic(&cluster, 1, "1000");
    cluster.create_topic("unrelated", 1, BTreeMap::new());
    let admin = MemoryAdmin::new(cluster.clone());

    let outcome = provisioner(&admin, spec(1)).provision();
    assert_eq!(
        outcome,
        ProvisionOutcome::Reconciled(Reconciliation {
            altered: vec![RETENTION_MS_CONFIG.to_owned()],
            partitions_increased_to: None,
        })
    );
    let configs = cluster.topic_configs(TOPIC).unwrap();
    assert_eq!(configs.get(RETENTION_MS_CONFIG).map(String::as_str), Some("18000000"));
    assert_eq!(configs.get(CLEANUP_POLICY_CONFIG).map(String::as_str), Some("delete"));
    assert_eq!(admin.altered().len(), 1);
}

#[test]
fn test_partitions_only_grow() {
    let cluster = MemoryCluster::new();
    existing_topic(&cluster, 2, "18000000");
    let admin = MemoryAdmin::new(cluster.clone());

    let outcome = provisioner(&admin, spec(6)).provision();
    assert_eq!(
        outcome,
        ProvisionOutcome::Reconciled(Reconciliation {
            altered: Vec::new(),
            partitions_increased_to: Some(6),
        })
    );
    assert_eq!(admin.calls(AdminOp::CreatePartitions), 1);
    assert_eq!(cluster.partition_count(TOPIC), Some(6));

    let admin = MemoryAdmin::new(cluster.clone());
    provisioner(&admin, spec(6)).provision();
    assert_eq!(admin.calls(AdminOp::CreatePartitions), 0);

    let admin = MemoryAdmin::new(cluster.clone());
    provisioner(&admin, spec(4)).provision();
    assert_eq!(admin.calls(AdminOp::CreatePartitions), 0);
    assert_eq!(cluster.partition_count(TOPIC), Some(6));
}

#[test]
fn test_create_timeouts_are_retried() {
    let cluster = MemoryCluster::new();
    let admin = MemoryAdmin::new(cluster.clone());
    admin.fail_creates(2);

    let outcome = provisioner(&admin, spec(1)).with_create_retries(3).provision();
    assert_eq!(outcome, ProvisionOutcome::Created);
    assert_eq!(admin.calls(AdminOp::CreateTopic), 3);
}

#[test]
fn test_gives_up_after_retries() {
    let cluster = MemoryCluster::new();
    let admin = MemoryAdmin::new(cluster.clone());
    admin.fail_creates(10);

    let outcome = provisioner(&admin, spec(1)).with_create_retries(2).provision();
    assert_eq!(outcome, ProvisionOutcome::GaveUp);
    assert_eq!(admin.calls(AdminOp::CreateTopic), 2);
    assert!(admin.is_closed());
    assert!(!cluster.has_topic(TOPIC));
}

#[test]
fn test_describe_and_reassignment_failures_are_best_effort() {
    let cluster = MemoryCluster::new();
    existing_topic(&cluster, 2, "1000");
    let admin = MemoryAdmin::new(cluster.clone());
    admin.fail_describe(true);
    admin.reassignment_in_progress(true);

    assert_eq!(
        provisioner(&admin, spec(6)).provision(),
        ProvisionOutcome::Reconciled(Reconciliation::default())
    );
    assert_eq!(admin.calls(AdminOp::AlterConfigs), 0);
    assert_eq!(admin.calls(AdminOp::CreatePartitions), 1);
    assert_eq!(cluster.partition_count(TOPIC), Some(2));
    assert!(admin.is_closed());
}

#[test]
fn test_reporter_provisions_topic_on_start() {
    let cluster = MemoryCluster::new();
    let admin = MemoryAdmin::new(cluster.clone());
    let props = test_props(60_000)
        .with(config::TOPIC_AUTO_CREATE, true)
        .with(config::TOPIC_NUM_PARTITIONS, 4)
        .with(config::TOPIC_REPLICATION_FACTOR, 1);
    let reporter = MetricsReporter::configure(props, Arc::new(MemoryProducerFactory::new(cluster.clone())))
        .with_admin_factory(Arc::new(admin.clone()))
        .with_cpu_source(fixed_cpu())
        .build()
        .unwrap();
    reporter.init(Vec::new()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        reporter.loop_state() == LoopState::Running
    }));
    assert_eq!(cluster.partition_count(TOPIC), Some(4));
    assert!(admin.is_closed());
    reporter.close();
}

#[test]
fn test_invalid_topic_spec_disables_auto_create() {
    let cluster = MemoryCluster::new();
    let admin = MemoryAdmin::new(cluster.clone());
    let props = test_props(60_000)
        .with(config::TOPIC_AUTO_CREATE, true)
        .with(config::TOPIC_NUM_PARTITIONS, 4)
        .with(config::TOPIC_REPLICATION_FACTOR, 3)
        .with(config::TOPIC_MIN_INSYNC_REPLICAS, 5);
    let reporter = MetricsReporter::configure(props, Arc::new(MemoryProducerFactory::new(cluster.clone())))
        .with_admin_factory(Arc::new(admin.clone()))
        .with_cpu_source(fixed_cpu())
        .build()
        .unwrap();
    reporter.init(Vec::new()).unwrap();
    reporter.close();

    assert_eq!(admin.calls(AdminOp::CreateTopic), 0);
    assert!(!cluster.has_topic(TOPIC));
}
