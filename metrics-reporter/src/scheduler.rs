//! The reporting thread: provisions the topic once, then reports on a fixed
//! interval until shutdown.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::converter::MetricConverter;
use crate::cpu::CpuUtilSource;
use crate::error::ReporterError;
use crate::lifecycle::TopicProvisioner;
use crate::publisher::Publisher;
use crate::registration::RegistrationTable;
use crate::registry::MetricRegistry;
use crate::state::{LoopState, ReporterState, now_ms};

/// Grace period for in-flight sends when the reporter stops.
pub const PRODUCER_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest single park between shutdown checks.
pub const DEFAULT_SLEEP_SLICE: Duration = Duration::from_millis(500);

/// Whether a report is due at `now_ms`.
pub fn is_due(now_ms: i64, last_report_ms: i64, interval: Duration) -> bool {
    now_ms > last_report_ms.saturating_add(interval.as_millis() as i64)
}

/// Wake time after a tick that started at `now_ms`. Relative to the tick
/// start, so an overrunning tick delays the next one by at most its overrun.
pub fn next_report_time(now_ms: i64, interval: Duration) -> i64 {
    now_ms.saturating_add(interval.as_millis() as i64)
}

pub struct ReportingLoop {
    state: Arc<ReporterState>,
    publisher: Arc<Publisher>,
    converter: MetricConverter,
    table: Arc<RegistrationTable>,
    registry: Arc<dyn MetricRegistry>,
    cpu: Arc<dyn CpuUtilSource>,
    provisioner: Option<TopicProvisioner>,
    interval: Duration,
    sleep_slice: Duration,
}

impl std::fmt::Debug for ReportingLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingLoop")
            .field("publisher", &self.publisher)
            .field("interval", &self.interval)
            .field("provisioner", &self.provisioner)
            .finish_non_exhaustive()
    }
}

impl ReportingLoop {
    pub fn new(
        state: Arc<ReporterState>,
        publisher: Arc<Publisher>,
        converter: MetricConverter,
        table: Arc<RegistrationTable>,
        registry: Arc<dyn MetricRegistry>,
        cpu: Arc<dyn CpuUtilSource>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            publisher,
            converter,
            table,
            registry,
            cpu,
            provisioner: None,
            interval,
            sleep_slice: DEFAULT_SLEEP_SLICE,
        }
    }

    pub fn with_provisioner(mut self, provisioner: Option<TopicProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    pub fn with_sleep_slice(mut self, slice: Duration) -> Self {
        self.sleep_slice = slice.max(Duration::from_millis(1));
        self
    }

    /// Drive the loop to completion on the current thread. Returns once
    /// shutdown was requested and the publisher is closed.
    pub fn run(mut self) {
        info!(
            "Starting metrics reporter with reporting interval of {} ms.",
            self.interval.as_millis()
        );
        if let Some(provisioner) = self.provisioner.take() {
            provisioner.provision();
        }
        self.state.advance(LoopState::Running);

        while !self.state.is_shutdown() {
            let now = now_ms();
            if is_due(now, self.state.last_report_ms(), self.interval) {
                if let Err(e) = self.guarded_report(now) {
                    error!("Got exception in metrics reporter: {}", e);
                }
            }
            self.sleep_until(next_report_time(now, self.interval));
        }

        self.state.advance(LoopState::ShuttingDown);
        info!("Metrics reporter is shutting down.");
        self.publisher.close(PRODUCER_CLOSE_TIMEOUT);
        self.state.advance(LoopState::Stopped);
        info!("Metrics reporter stopped.");
    }

    fn guarded_report(&self, now: i64) -> Result<(), ReporterError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.report(now))) {
            Ok(result) => result,
            Err(payload) => Err(ReporterError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// One tick: sample both registries and the CPU, send, then flush.
    fn report(&self, now: i64) -> Result<(), ReporterError> {
        self.state.reset_send_failures();
        self.state.set_last_report_ms(now);
        debug!("Reporting metrics for time {}.", now);

        let mut records = self.converter.convert_registry(self.registry.as_ref(), now);
        records.extend(self.converter.convert_tracked(&self.table.snapshot(), now));
        match self.converter.cpu_record(self.cpu.as_ref(), now) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Failed reporting CPU util: {}", e),
        }

        let count = records.len();
        for record in records {
            self.publisher.send(record);
        }
        self.publisher.flush()?;

        let failures = self.state.send_failures();
        if failures > 0 {
            warn!("Failed to send {} metrics for time {}", failures, now);
        }
        debug!("Finished reporting {} metrics for time {}.", count, now);
        Ok(())
    }

    /// Park in slices until the clock passes `next_tick_ms` or shutdown is
    /// requested. An unpark ends the current slice early.
    fn sleep_until(&self, next_tick_ms: i64) {
        loop {
            if self.state.is_shutdown() {
                return;
            }
            let now = now_ms();
            if now > next_tick_ms {
                return;
            }
            let remaining = Duration::from_millis((next_tick_ms - now) as u64 + 1);
            thread::park_timeout(remaining.min(self.sleep_slice));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
