use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::catalog::MetricCatalog;
use crate::name::MetricName;

/// A live metric handle owned by the host.
pub trait TrackedMetric: Send + Sync {
    fn metric_name(&self) -> &MetricName;
    fn value(&self) -> f64;
}

/// A tracked metric holding a single settable value.
#[derive(Debug)]
pub struct ValueMetric {
    name: MetricName,
    bits: AtomicU64,
}

impl ValueMetric {
    pub fn new(name: MetricName, value: f64) -> Self {
        Self {
            name,
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl TrackedMetric for ValueMetric {
    fn metric_name(&self) -> &MetricName {
        &self.name
    }

    fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// The set of interested host metrics. Registration hooks run on host
/// threads while the reporter thread snapshots the table every tick.
pub struct RegistrationTable {
    catalog: Arc<dyn MetricCatalog>,
    metrics: DashMap<MetricName, Arc<dyn TrackedMetric>>,
}

impl fmt::Debug for RegistrationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationTable")
            .field("len", &self.metrics.len())
            .finish()
    }
}

impl RegistrationTable {
    pub fn new(catalog: Arc<dyn MetricCatalog>) -> Self {
        Self {
            catalog,
            metrics: DashMap::new(),
        }
    }

    /// Track `metric` if the catalog is interested in it. Re-registering a
    /// name replaces the previous handle.
    pub fn register(&self, metric: Arc<dyn TrackedMetric>) -> bool {
        let name = metric.metric_name();
        trace!("Checking metric {}", name);
        if !self.catalog.is_interested(name) {
            return false;
        }
        debug!("Added new metric {} to metrics reporter.", name);
        self.metrics.insert(name.clone(), metric);
        true
    }

    pub fn unregister(&self, name: &MetricName) -> bool {
        self.metrics.remove(name).is_some()
    }

    /// Copy out the current handles. Shard locks are held only while
    /// copying, never across conversion or sends.
    pub fn snapshot(&self) -> Vec<Arc<dyn TrackedMetric>> {
        self.metrics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn contains(&self, name: &MetricName) -> bool {
        self.metrics.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BrokerCatalog;
    use std::thread;

    fn table() -> RegistrationTable {
        RegistrationTable::new(Arc::new(BrokerCatalog))
    }

    fn size_metric(topic: &str, partition: i32) -> Arc<dyn TrackedMetric> {
        Arc::new(ValueMetric::new(
            MetricName::new("kafka.log", "Log", "Size")
                .with_topic(topic)
                .with_partition(partition),
            1.0,
        ))
    }

    #[test]
    fn test_register_respects_interest() {
        let table = table();
        assert!(table.register(size_metric("t", 0)));
        let boring = Arc::new(ValueMetric::new(
            MetricName::new("kafka.server", "ReplicaManager", "LeaderCount"),
            3.0,
        ));
        assert!(!table.register(boring.clone()));
        assert_eq!(table.len(), 1);
        assert!(!table.contains(boring.metric_name()));
    }

    #[test]
    fn test_unregister_is_unconditional() {
        let table = table();
        let metric = size_metric("t", 0);
        table.register(metric.clone());
        assert!(table.unregister(metric.metric_name()));
        assert!(!table.unregister(metric.metric_name()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_reregistering_replaces_handle() {
        let table = table();
        let name = MetricName::new("kafka.log", "Log", "Size")
            .with_topic("t")
            .with_partition(1);
        table.register(Arc::new(ValueMetric::new(name.clone(), 1.0)));
        table.register(Arc::new(ValueMetric::new(name, 2.0)));
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].value(), 2.0);
    }

    #[test]
    fn test_concurrent_mutation_during_snapshots() {
        let table = Arc::new(table());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let table = table.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let metric = size_metric(&format!("t{w}"), i);
                        table.register(metric.clone());
                        if i % 2 == 0 {
                            table.unregister(metric.metric_name());
                        }
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            let _ = table.snapshot();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(table.len(), 4 * 250);
    }
}
