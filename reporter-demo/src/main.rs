//! Metrics reporter demo
//!
//! Runs the reporter against the in-process log with a synthetic broker
//! registry, then prints what landed on the metrics topic.
//!
//! Usage:
//!   cargo run -p reporter-demo
//!   cargo run -p reporter-demo -- --interval-ms 200 --duration-secs 3
//!   cargo run -p reporter-demo -- --props reporter.json
//!
//! Enable logging with RUST_LOG:
//!   RUST_LOG=debug cargo run -p reporter-demo

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use metrics_reporter::codec::CdrCodec;
use metrics_reporter::config;
use metrics_reporter::memlog::{MemoryAdmin, MemoryCluster, MemoryProducerFactory};
use metrics_reporter::registry::HistogramSnapshot;
use metrics_reporter::{
    Builder, MetricName, MetricRegistry, MetricSample, MetricsReporter, Properties, RawMetricType,
    RegistryLocator, SharedRegistry, TrackedMetric, ValueMetric,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with reporter properties (flat string map)
    #[arg(short, long)]
    props: Option<String>,

    /// Reporting interval in milliseconds
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,

    /// How long to run before closing the reporter
    #[arg(short, long, default_value_t = 3)]
    duration_secs: u64,

    /// Broker id stamped on every record
    #[arg(short, long, default_value_t = 0)]
    broker_id: i32,

    /// Topic names to simulate traffic for
    #[arg(short, long, value_delimiter = ',', default_value = "orders,payments")]
    topics: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_props(args: &Args) -> Result<Properties, Box<dyn Error>> {
    let mut props = match &args.props {
        Some(path) => serde_json::from_str::<Properties>(&fs::read_to_string(path)?)?,
        None => Properties::new(),
    };
    props.set_if_absent(config::BROKER_ID, args.broker_id);
    props.set_if_absent(config::LISTENERS, "PLAINTEXT://127.0.0.1:9092");
    props.set_if_absent(config::REPORTING_INTERVAL_MS, args.interval_ms);
    props.set_if_absent(config::TOPIC_AUTO_CREATE, true);
    props.set_if_absent(config::TOPIC_NUM_PARTITIONS, 3);
    props.set_if_absent(config::TOPIC_REPLICATION_FACTOR, 1);
    Ok(props)
}

fn mbean(name: &str) -> Result<MetricName, Box<dyn Error>> {
    MetricName::parse(name).ok_or_else(|| format!("invalid metric name {name:?}").into())
}

/// Advance the synthetic broker counters by one step.
fn simulate_traffic(registry: &SharedRegistry, topics: &[String], step: u64) -> Result<(), Box<dyn Error>> {
    for (i, topic) in topics.iter().enumerate() {
        let rate = (step * 10 + i as u64 * 3) as f64;
        registry.set(
            mbean(&format!("kafka.server:type=BrokerTopicMetrics,name=BytesInPerSec,topic={topic}"))?,
            MetricSample::Meter {
                count: step * 100,
                one_minute_rate: rate,
            },
        );
        registry.set(
            mbean(&format!("kafka.log:type=Log,name=Size,topic={topic},partition=0"))?,
            MetricSample::Gauge {
                value: (step * 4096) as f64,
            },
        );
    }
    registry.set(
        mbean("kafka.server:type=BrokerTopicMetrics,name=BytesInPerSec")?,
        MetricSample::Meter {
            count: step * 100 * topics.len() as u64,
            one_minute_rate: (step * 10 * topics.len() as u64) as f64,
        },
    );
    registry.set(
        mbean("kafka.log:type=LogFlushStats,name=LogFlushRateAndTimeMs")?,
        MetricSample::Timer {
            one_minute_rate: 1.0,
            durations: HistogramSnapshot {
                count: step,
                max: 12.0,
                mean: 4.0,
                p50: 3.5,
                p999: 11.0,
            },
        },
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let props = load_props(&args)?;
    let cluster = MemoryCluster::new();
    let registry = Arc::new(SharedRegistry::new());
    simulate_traffic(&registry, &args.topics, 0)?;

    let host_registry: Arc<dyn MetricRegistry> = registry.clone();
    let reporter = MetricsReporter::configure(props, Arc::new(MemoryProducerFactory::new(cluster.clone())))
        .with_admin_factory(Arc::new(MemoryAdmin::new(cluster.clone())))
        .with_registry_locator(RegistryLocator::new().with_registry("demo", host_registry))
        .build()?;

    let queue_size = Arc::new(ValueMetric::new(
        mbean("kafka.network:type=RequestChannel,name=RequestQueueSize")?,
        0.0,
    ));
    let tracked: Vec<Arc<dyn TrackedMetric>> = vec![queue_size.clone()];
    reporter.init(tracked)?;

    let start = Instant::now();
    let mut step = 1;
    while start.elapsed() < Duration::from_secs(args.duration_secs) {
        thread::sleep(Duration::from_millis(args.interval_ms.max(50) / 2));
        simulate_traffic(&registry, &args.topics, step)?;
        queue_size.set((step % 7) as f64);
        step += 1;
    }
    reporter.close();

    let topic = &reporter.config().topic;
    let records = cluster.records(topic);
    info!(
        "{} records on {} across {} partitions",
        records.len(),
        topic,
        cluster.partition_count(topic).unwrap_or(0)
    );
    for record in records {
        let wire = CdrCodec::decode(&record.value)?;
        let kind = RawMetricType::from_repr(wire.raw_type)
            .map_or_else(|| wire.raw_type.to_string(), |kind| kind.to_string());
        println!(
            "p{} @{} key={} {} time={} value={}",
            record.partition, record.offset, record.key, kind, wire.time_ms, wire.value
        );
    }
    Ok(())
}
