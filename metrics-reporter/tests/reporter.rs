mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use metrics_reporter::codec::CdrCodec;
use metrics_reporter::memlog::{MemoryCluster, MemoryProducerFactory};
use metrics_reporter::registry::HistogramSnapshot;
use metrics_reporter::{
    Builder, LoopState, MetricName, MetricRegistry, MetricSample, MetricsReporter, RawMetricType,
    RegistryLocator, SharedRegistry, TrackedMetric, ValueMetric,
};

use crate::common::*;

fn queue_size() -> MetricName {
    MetricName::new("kafka.network", "RequestChannel", "RequestQueueSize")
}

fn shared_registry() -> Arc<SharedRegistry> {
    let registry = Arc::new(SharedRegistry::new());
    registry.set(
        MetricName::new("kafka.server", "BrokerTopicMetrics", "BytesInPerSec").with_topic("orders"),
        MetricSample::Meter {
            count: 10,
            one_minute_rate: 42.0,
        },
    );
    registry.set(
        MetricName::new("kafka.log", "LogFlushStats", "LogFlushRateAndTimeMs"),
        MetricSample::Timer {
            one_minute_rate: 3.0,
            durations: HistogramSnapshot {
                count: 5,
                max: 4.0,
                mean: 2.0,
                p50: 1.5,
                p999: 3.9,
            },
        },
    );
    registry
}

fn reporter(cluster: &MemoryCluster, interval_ms: u64) -> (Arc<MemoryProducerFactory>, MetricsReporter) {
    let factory = Arc::new(MemoryProducerFactory::new(cluster.clone()));
    let registry: Arc<dyn MetricRegistry> = shared_registry();
    let reporter = MetricsReporter::configure(test_props(interval_ms), factory.clone())
        .with_registry_locator(RegistryLocator::new().with_registry("shared", registry))
        .with_cpu_source(fixed_cpu())
        .with_sleep_slice(Duration::from_millis(10))
        .build()
        .unwrap();
    (factory, reporter)
}

#[test]
fn test_reports_all_three_passes() {
    let cluster = MemoryCluster::new();
    let (_, reporter) = reporter(&cluster, 50);
    let tracked: Arc<dyn TrackedMetric> = Arc::new(ValueMetric::new(queue_size(), 7.0));
    reporter.init(vec![tracked]).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let kinds: Vec<u8> = cluster
            .records(TOPIC)
            .iter()
            .map(|r| CdrCodec::decode(&r.value).unwrap().raw_type)
            .collect();
        kinds.contains(&RawMetricType::BrokerCpuUtil.id())
            && kinds.contains(&RawMetricType::BrokerRequestQueueSize.id())
            && kinds.contains(&RawMetricType::TopicBytesIn.id())
            && kinds.contains(&RawMetricType::BrokerLogFlushTimeMs999th.id())
    }));
    reporter.close();

    for record in cluster.records(TOPIC) {
        let wire = CdrCodec::decode(&record.value).unwrap();
        assert_eq!(wire.broker_id, 1);
        assert_eq!(record.timestamp_ms, wire.time_ms);
        if wire.raw_type == RawMetricType::TopicBytesIn.id() {
            assert_eq!(record.key, "orders");
            assert_eq!(wire.value, 42.0);
        } else {
            assert_eq!(record.key, "1");
        }
    }
}

#[test]
fn test_hooks_track_interested_metrics_only() {
    let cluster = MemoryCluster::new();
    let (_, reporter) = reporter(&cluster, 60_000);
    reporter.init(Vec::new()).unwrap();

    let ignored = MetricName::new("kafka.controller", "KafkaController", "ActiveControllerCount");
    assert!(!reporter.metric_change(Arc::new(ValueMetric::new(ignored, 1.0))));
    assert!(reporter.metric_change(Arc::new(ValueMetric::new(queue_size(), 1.0))));
    assert_eq!(reporter.registered_metrics(), 1);

    assert!(reporter.metric_removal(&queue_size()));
    assert!(!reporter.metric_removal(&queue_size()));
    assert_eq!(reporter.registered_metrics(), 0);
    reporter.close();
}

#[test]
fn test_close_interrupts_sleep_promptly() {
    let cluster = MemoryCluster::new();
    let (factory, reporter) = reporter(&cluster, 60_000);
    reporter.init(Vec::new()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        reporter.loop_state() == LoopState::Running
    }));

    let start = Instant::now();
    reporter.close();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(reporter.loop_state(), LoopState::Stopped);

    reporter.close();
    assert_eq!(factory.last_producer().unwrap().close_calls(), 1);
    // Nothing was due within the first interval.
    assert!(cluster.records(TOPIC).is_empty());
}

#[test]
fn test_close_before_init_closes_producer() {
    let cluster = MemoryCluster::new();
    let (factory, reporter) = reporter(&cluster, 50);
    reporter.close();
    assert_eq!(reporter.loop_state(), LoopState::Stopped);
    assert_eq!(factory.last_producer().unwrap().close_calls(), 1);
}

#[test]
fn test_concurrent_close_waits_for_the_producer() {
    let cluster = MemoryCluster::new();
    let factory = Arc::new(
        MemoryProducerFactory::new(cluster.clone()).with_delivery_delay(Duration::from_millis(100)),
    );
    let registry: Arc<dyn MetricRegistry> = shared_registry();
    let reporter = Arc::new(
        MetricsReporter::configure(test_props(20), factory.clone())
            .with_registry_locator(RegistryLocator::new().with_registry("shared", registry))
            .with_cpu_source(fixed_cpu())
            .with_sleep_slice(Duration::from_millis(10))
            .build()
            .unwrap(),
    );
    reporter.init(Vec::new()).unwrap();
    let producer = factory.last_producer().unwrap();
    assert!(wait_until(Duration::from_secs(5), || producer.inflight() > 0));

    let first = {
        let reporter = reporter.clone();
        thread::spawn(move || reporter.close())
    };
    thread::sleep(Duration::from_millis(20));
    reporter.close();

    // The second close returns only once the loop closed the producer.
    assert_eq!(reporter.loop_state(), LoopState::Stopped);
    assert_eq!(producer.inflight(), 0);
    assert!(!cluster.records(TOPIC).is_empty());
    first.join().unwrap();
    assert_eq!(producer.close_calls(), 1);
}

#[test]
fn test_send_failures_do_not_stop_the_loop() {
    let cluster = MemoryCluster::new();
    let (factory, reporter) = reporter(&cluster, 30);
    let producer = factory.last_producer().unwrap();
    producer.fail_next_sends(21);
    reporter.init(Vec::new()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || reporter.send_failures() > 0));
    assert!(wait_until(Duration::from_secs(5), || !cluster.records(TOPIC).is_empty()));
    reporter.close();
}

struct FlakyRegistry {
    panicked: AtomicBool,
    inner: Arc<SharedRegistry>,
}

impl MetricRegistry for FlakyRegistry {
    fn all_metrics(&self) -> Vec<(MetricName, MetricSample)> {
        if !self.panicked.swap(true, Ordering::AcqRel) {
            panic!("registry is not ready");
        }
        self.inner.all_metrics()
    }
}

#[test]
fn test_bad_tick_is_not_fatal() {
    let cluster = MemoryCluster::new();
    let factory = Arc::new(MemoryProducerFactory::new(cluster.clone()));
    let registry: Arc<dyn MetricRegistry> = Arc::new(FlakyRegistry {
        panicked: AtomicBool::new(false),
        inner: shared_registry(),
    });
    let reporter = MetricsReporter::configure(test_props(30), factory)
        .with_registry_locator(RegistryLocator::new().with_registry("flaky", registry))
        .with_cpu_source(fixed_cpu())
        .with_sleep_slice(Duration::from_millis(10))
        .build()
        .unwrap();
    reporter.init(Vec::new()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        cluster
            .records(TOPIC)
            .iter()
            .any(|r| CdrCodec::decode(&r.value).unwrap().raw_type == RawMetricType::TopicBytesIn.id())
    }));
    assert_eq!(reporter.loop_state(), LoopState::Running);
    reporter.close();
}

#[test]
fn test_missing_registry_fails_configure() {
    let factory = Arc::new(MemoryProducerFactory::new(MemoryCluster::new()));
    let locator = RegistryLocator::new()
        .with_strategy("first", || None)
        .with_strategy("second", || None);
    let result = MetricsReporter::configure(test_props(30), factory.clone())
        .with_registry_locator(locator)
        .build();
    assert!(result.is_err());
    assert_eq!(factory.attempts(), 0);
}

/// Registry whose first read takes `first_delay`. Records when each read starts.
struct SlowFirstRead {
    first_delay: Duration,
    reads: Mutex<Vec<Instant>>,
}

impl MetricRegistry for SlowFirstRead {
    fn all_metrics(&self) -> Vec<(MetricName, MetricSample)> {
        let first = {
            let mut reads = self.reads.lock().unwrap();
            reads.push(Instant::now());
            reads.len() == 1
        };
        if first {
            thread::sleep(self.first_delay);
        }
        Vec::new()
    }
}

#[test]
fn test_overrun_tick_is_not_followed_by_a_burst() {
    let interval = Duration::from_millis(50);
    let registry = Arc::new(SlowFirstRead {
        first_delay: interval * 6,
        reads: Mutex::new(Vec::new()),
    });
    let factory = Arc::new(MemoryProducerFactory::new(MemoryCluster::new()));
    let reporter = MetricsReporter::configure(test_props(interval.as_millis() as u64), factory)
        .with_registry_locator(RegistryLocator::new().with_registry("slow", registry.clone()))
        .with_cpu_source(fixed_cpu())
        .with_sleep_slice(Duration::from_millis(5))
        .build()
        .unwrap();
    reporter.init(Vec::new()).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.reads.lock().unwrap().len() >= 5
    }));
    reporter.close();

    let reads = registry.reads.lock().unwrap().clone();
    let gaps: Vec<Duration> = reads.windows(2).map(|w| w[1] - w[0]).collect();
    // The overrun delays the second tick once...
    assert!(gaps[0] >= interval * 6);
    // ...and the ticks after it keep a full interval apart, give or take
    // the millisecond clock.
    let slack = Duration::from_millis(5);
    for gap in &gaps[1..] {
        assert!(*gap + slack >= interval, "ticks {gap:?} apart");
    }
}
