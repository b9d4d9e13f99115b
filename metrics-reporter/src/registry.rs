//! The host's hierarchical metric registry and how the reporter finds it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use strum::{Display, EnumDiscriminants};
use tracing::info;

use crate::error::RegistryError;
use crate::name::MetricName;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p999: f64,
}

/// Point-in-time reading of one registry entry, tagged by shape.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(MetricShape), derive(Display, Hash))]
pub enum MetricSample {
    Counter { count: i64 },
    Gauge { value: f64 },
    Histogram(HistogramSnapshot),
    Meter { count: u64, one_minute_rate: f64 },
    Timer {
        one_minute_rate: f64,
        durations: HistogramSnapshot,
    },
}

impl MetricSample {
    pub fn shape(&self) -> MetricShape {
        MetricShape::from(self)
    }
}

/// Host-owned registry of named metrics, read once per tick.
pub trait MetricRegistry: Send + Sync {
    fn all_metrics(&self) -> Vec<(MetricName, MetricSample)>;
}

/// A registry backed by a locked map. Hosts without their own registry can
/// publish samples into it.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    metrics: RwLock<BTreeMap<MetricName, MetricSample>>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: MetricName, sample: MetricSample) {
        self.metrics.write().insert(name, sample);
    }

    pub fn remove(&self, name: &MetricName) -> Option<MetricSample> {
        self.metrics.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}

impl MetricRegistry for SharedRegistry {
    fn all_metrics(&self) -> Vec<(MetricName, MetricSample)> {
        self.metrics
            .read()
            .iter()
            .map(|(name, sample)| (name.clone(), sample.clone()))
            .collect()
    }
}

type Strategy = Box<dyn Fn() -> Option<Arc<dyn MetricRegistry>> + Send + Sync>;

/// Ordered list of named ways to acquire the host registry. The first
/// strategy that yields a registry wins.
#[derive(Default)]
pub struct RegistryLocator {
    strategies: Vec<(String, Strategy)>,
}

impl fmt::Debug for RegistryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|(name, _)| name))
            .finish()
    }
}

impl RegistryLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy<S, F>(mut self, name: S, strategy: F) -> Self
    where
        S: Into<String>,
        F: Fn() -> Option<Arc<dyn MetricRegistry>> + Send + Sync + 'static,
    {
        self.strategies.push((name.into(), Box::new(strategy)));
        self
    }

    /// Strategy that always yields `registry`.
    pub fn with_registry<S: Into<String>>(self, name: S, registry: Arc<dyn MetricRegistry>) -> Self {
        self.with_strategy(name, move || Some(registry.clone()))
    }

    pub fn locate(&self) -> Result<Arc<dyn MetricRegistry>, RegistryError> {
        let mut tried = Vec::with_capacity(self.strategies.len());
        for (name, strategy) in &self.strategies {
            if let Some(registry) = strategy() {
                info!("Found metric registry {}.", name);
                return Ok(registry);
            }
            info!("Metric registry {} not available, trying the next one.", name);
            tried.push(name.clone());
        }
        Err(RegistryError::NotFound { tried })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_locator_uses_first_available_strategy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Arc::new(SharedRegistry::new());
        first.set(
            MetricName::new("kafka.log", "Log", "Size"),
            MetricSample::Gauge { value: 1.0 },
        );
        let counted = calls.clone();
        let locator = RegistryLocator::new()
            .with_strategy("missing", || None)
            .with_registry("first", first)
            .with_strategy("never", move || {
                counted.fetch_add(1, Ordering::SeqCst);
                None
            });
        let registry = locator.locate().unwrap();
        assert_eq!(registry.all_metrics().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_locator_fails_when_nothing_found() {
        let locator = RegistryLocator::new()
            .with_strategy("a", || None)
            .with_strategy("b", || None);
        match locator.locate() {
            Err(RegistryError::NotFound { tried }) => assert_eq!(tried, vec!["a", "b"]),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[test]
    fn test_sample_shape() {
        assert_eq!(MetricSample::Counter { count: 1 }.shape(), MetricShape::Counter);
        assert_eq!(
            MetricSample::Histogram(HistogramSnapshot::default()).shape(),
            MetricShape::Histogram
        );
        assert_eq!(MetricShape::Timer.to_string(), "Timer");
    }
}
