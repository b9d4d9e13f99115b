//! Turns registry samples and tracked metrics into canonical records.

use std::io;
use std::sync::Arc;

use tracing::trace;

use crate::catalog::{MetricCatalog, Stat};
use crate::cpu::CpuUtilSource;
use crate::name::MetricName;
use crate::record::{MetricClass, MetricRecord, RawMetricType};
use crate::registration::TrackedMetric;
use crate::registry::{HistogramSnapshot, MetricRegistry, MetricSample};

pub struct MetricConverter {
    catalog: Arc<dyn MetricCatalog>,
    broker_id: i32,
}

impl std::fmt::Debug for MetricConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricConverter")
            .field("broker_id", &self.broker_id)
            .finish_non_exhaustive()
    }
}

impl MetricConverter {
    pub fn new(catalog: Arc<dyn MetricCatalog>, broker_id: i32) -> Self {
        Self { catalog, broker_id }
    }

    /// Records for every entry of the hierarchical registry.
    pub fn convert_registry(&self, registry: &dyn MetricRegistry, now_ms: i64) -> Vec<MetricRecord> {
        let mut records = Vec::new();
        for (name, sample) in registry.all_metrics() {
            records.extend(self.convert_sample(&name, &sample, now_ms));
        }
        records
    }

    /// Records for one registry entry, dispatched on its shape.
    pub fn convert_sample(&self, name: &MetricName, sample: &MetricSample, now_ms: i64) -> Vec<MetricRecord> {
        trace!("Processing {} metric {}", sample.shape(), name);
        match sample {
            MetricSample::Counter { count } => self.on_value(name, *count as f64, now_ms).into_iter().collect(),
            MetricSample::Gauge { value } => self.on_value(name, *value, now_ms).into_iter().collect(),
            MetricSample::Meter { one_minute_rate, .. } => {
                self.on_value(name, *one_minute_rate, now_ms).into_iter().collect()
            }
            MetricSample::Histogram(snapshot) => self.on_histogram(name, snapshot, now_ms),
            MetricSample::Timer {
                one_minute_rate,
                durations,
            } => {
                let mut records: Vec<MetricRecord> =
                    self.on_value(name, *one_minute_rate, now_ms).into_iter().collect();
                records.extend(self.on_histogram(name, durations, now_ms));
                records
            }
        }
    }

    /// Records for the handles currently in the registration table.
    pub fn convert_tracked(&self, metrics: &[Arc<dyn TrackedMetric>], now_ms: i64) -> Vec<MetricRecord> {
        metrics
            .iter()
            .filter_map(|metric| {
                trace!("Processing tracked metric {}", metric.metric_name());
                self.on_value(metric.metric_name(), metric.value(), now_ms)
            })
            .collect()
    }

    /// The broker CPU utilization record.
    pub fn cpu_record(&self, source: &dyn CpuUtilSource, now_ms: i64) -> io::Result<MetricRecord> {
        let util = source.cpu_util()?;
        Ok(MetricRecord::broker(RawMetricType::BrokerCpuUtil, now_ms, self.broker_id, util))
    }

    fn on_value(&self, name: &MetricName, value: f64, now_ms: i64) -> Option<MetricRecord> {
        let kind = self.catalog.raw_metric_type(name, Stat::Value)?;
        self.record(kind, name, value, now_ms)
    }

    fn on_histogram(&self, name: &MetricName, snapshot: &HistogramSnapshot, now_ms: i64) -> Vec<MetricRecord> {
        Stat::PERCENTILES
            .into_iter()
            .filter_map(|stat| {
                let kind = self.catalog.raw_metric_type(name, stat)?;
                let value = match stat {
                    Stat::Max => snapshot.max,
                    Stat::Mean => snapshot.mean,
                    Stat::P50 => snapshot.p50,
                    Stat::P999 => snapshot.p999,
                    Stat::Value => return None,
                };
                self.record(kind, name, value, now_ms)
            })
            .collect()
    }

    /// Stamp `value` with the scope `kind` demands. Samples missing the
    /// tags their scope needs are dropped.
    fn record(&self, kind: RawMetricType, name: &MetricName, value: f64, now_ms: i64) -> Option<MetricRecord> {
        let record = match kind.class() {
            MetricClass::BrokerMetric => MetricRecord::broker(kind, now_ms, self.broker_id, value),
            MetricClass::TopicMetric => {
                MetricRecord::topic(kind, now_ms, self.broker_id, name.topic()?, value)
            }
            MetricClass::PartitionMetric => MetricRecord::partition(
                kind,
                now_ms,
                self.broker_id,
                name.topic()?,
                name.partition()?,
                value,
            ),
        };
        Some(record)
    }
}
