#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use metrics_reporter::config::{self, Properties};
use metrics_reporter::cpu::CpuUtilSource;

pub const TOPIC: &str = "__TestMetrics";

/// Properties for broker 1 reporting every `interval_ms` to [`TOPIC`].
pub fn test_props(interval_ms: u64) -> Properties {
    Properties::new()
        .with(config::BROKER_ID, 1)
        .with(config::TOPIC, TOPIC)
        .with(config::REPORTING_INTERVAL_MS, interval_ms)
        .with("metrics.reporter.bootstrap.servers", "127.0.0.1:9092")
}

pub struct FixedCpu(pub f64);

impl CpuUtilSource for FixedCpu {
    fn cpu_util(&self) -> io::Result<f64> {
        Ok(self.0)
    }
}

pub fn fixed_cpu() -> Arc<dyn CpuUtilSource> {
    Arc::new(FixedCpu(0.5))
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
