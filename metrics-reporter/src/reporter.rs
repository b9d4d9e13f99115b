//! Host-facing reporter: configure, start, track metric changes, close.

use std::mem;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::Builder;
use crate::admin::AdminFactory;
use crate::bootstrap::build_producer;
use crate::catalog::{BrokerCatalog, MetricCatalog};
use crate::codec::{CdrCodec, MetricCodec};
use crate::config::{Properties, ReporterConfig};
use crate::converter::MetricConverter;
use crate::cpu::{CpuMode, CpuUtilSource, ProcCpuSource};
use crate::error::ReporterError;
use crate::lifecycle::TopicProvisioner;
use crate::name::MetricName;
use crate::producer::ProducerFactory;
use crate::publisher::Publisher;
use crate::registration::{RegistrationTable, TrackedMetric};
use crate::registry::{MetricRegistry, RegistryLocator, SharedRegistry};
use crate::retry::{Backoff, RetryError};
use crate::scheduler::{DEFAULT_SLEEP_SLICE, ReportingLoop};
use crate::state::{LoopState, ReporterState, now_ms};

/// How long `close` waits for the reporting thread.
pub const REPORTER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const THREAD_NAME: &str = "MetricsReporterRunner";

pub struct ReporterBuilder {
    props: Properties,
    producer_factory: Arc<dyn ProducerFactory>,
    admin_factory: Option<Arc<dyn AdminFactory>>,
    locator: Option<RegistryLocator>,
    cpu: Option<Arc<dyn CpuUtilSource>>,
    codec: Arc<dyn MetricCodec>,
    catalog: Arc<dyn MetricCatalog>,
    backoff: Backoff,
    sleep_slice: Duration,
}

impl ReporterBuilder {
    pub fn new(props: Properties, producer_factory: Arc<dyn ProducerFactory>) -> Self {
        Self {
            props,
            producer_factory,
            admin_factory: None,
            locator: None,
            cpu: None,
            codec: Arc::new(CdrCodec),
            catalog: Arc::new(BrokerCatalog),
            backoff: Backoff::default(),
            sleep_slice: DEFAULT_SLEEP_SLICE,
        }
    }

    /// Required for topic auto-creation.
    pub fn with_admin_factory(mut self, factory: Arc<dyn AdminFactory>) -> Self {
        self.admin_factory = Some(factory);
        self
    }

    /// Where to find the host's hierarchical registry. Without one the
    /// reporter reads an empty [`SharedRegistry`].
    pub fn with_registry_locator(mut self, locator: RegistryLocator) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_cpu_source(mut self, cpu: Arc<dyn CpuUtilSource>) -> Self {
        self.cpu = Some(cpu);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MetricCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn MetricCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Backoff between producer construction and topic creation attempts.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_sleep_slice(mut self, slice: Duration) -> Self {
        self.sleep_slice = slice;
        self
    }

    fn provisioner(&self, config: &ReporterConfig, state: &Arc<ReporterState>) -> Option<TopicProvisioner> {
        if !config.topic_auto_create {
            return None;
        }
        let spec = match config.topic_spec() {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Metrics topic auto-creation is disabled: {}", e);
                return None;
            }
        };
        let Some(factory) = &self.admin_factory else {
            warn!("Metrics topic auto-creation is disabled: no admin client available.");
            return None;
        };
        match factory.create(&config.admin_properties(&self.props)) {
            Ok(admin) => Some(
                TopicProvisioner::new(admin, spec)
                    .with_create_timeout(config.topic_auto_create_timeout)
                    .with_create_retries(config.topic_auto_create_retries)
                    .with_backoff(self.backoff)
                    .with_state(state.clone()),
            ),
            Err(e) => {
                warn!("Metrics topic auto-creation is disabled: {}", e);
                None
            }
        }
    }
}

impl Builder for ReporterBuilder {
    type Output = MetricsReporter;

    fn build(self) -> crate::Result<MetricsReporter> {
        let config = ReporterConfig::from_props(&self.props)?;
        let state = Arc::new(ReporterState::new(now_ms()));
        let table = Arc::new(RegistrationTable::new(self.catalog.clone()));
        let registry: Arc<dyn MetricRegistry> = match &self.locator {
            Some(locator) => locator.locate()?,
            None => Arc::new(SharedRegistry::new()),
        };

        let producer = match build_producer(
            self.producer_factory.as_ref(),
            &config.client,
            config.create_retries,
            self.backoff,
        ) {
            Ok(producer) => producer,
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    "Metrics reporter is disabled: unable to create the producer after {} attempts: {}",
                    attempts, last
                );
                state.request_shutdown();
                state.advance(LoopState::Stopped);
                return Ok(MetricsReporter {
                    config,
                    state,
                    table,
                    publisher: None,
                    stage: Mutex::new(Stage::Disabled),
                });
            }
            Err(RetryError::Aborted(e)) => return Err(e.into()),
        };

        let cpu: Arc<dyn CpuUtilSource> = match &self.cpu {
            Some(cpu) => cpu.clone(),
            None if config.kubernetes_mode => Arc::new(ProcCpuSource::new(CpuMode::Container)),
            None => Arc::new(ProcCpuSource::new(CpuMode::Host)),
        };
        let provisioner = self.provisioner(&config, &state);

        let publisher = Arc::new(Publisher::new(
            producer,
            self.codec.clone(),
            config.topic.clone(),
            state.clone(),
        ));
        let reporting_loop = ReportingLoop::new(
            state.clone(),
            publisher.clone(),
            MetricConverter::new(self.catalog.clone(), config.broker_id),
            table.clone(),
            registry,
            cpu,
            config.reporting_interval,
        )
        .with_provisioner(provisioner)
        .with_sleep_slice(self.sleep_slice);

        Ok(MetricsReporter {
            config,
            state,
            table,
            publisher: Some(publisher),
            stage: Mutex::new(Stage::Configured(Box::new(reporting_loop))),
        })
    }
}

enum Stage {
    /// Producer construction gave up. Hooks still work, nothing is reported.
    Disabled,
    Configured(Box<ReportingLoop>),
    Running {
        handle: JoinHandle<()>,
        done: flume::Receiver<()>,
    },
    /// A `close` is waiting for the loop. Disconnects once the loop returned.
    Stopping(flume::Receiver<()>),
    Closed,
}

/// Periodically publishes the host's metrics to the metrics topic.
pub struct MetricsReporter {
    config: ReporterConfig,
    state: Arc<ReporterState>,
    table: Arc<RegistrationTable>,
    publisher: Option<Arc<Publisher>>,
    stage: Mutex<Stage>,
}

impl std::fmt::Debug for MetricsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsReporter")
            .field("topic", &self.config.topic)
            .field("loop_state", &self.loop_state())
            .field("disabled", &self.is_disabled())
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl MetricsReporter {
    pub fn configure(props: Properties, producer_factory: Arc<dyn ProducerFactory>) -> ReporterBuilder {
        ReporterBuilder::new(props, producer_factory)
    }

    /// Register the initial metrics and start the reporting thread.
    pub fn init<I>(&self, metrics: I) -> crate::Result<()>
    where
        I: IntoIterator<Item = Arc<dyn TrackedMetric>>,
    {
        let added = metrics
            .into_iter()
            .filter(|metric| self.table.register(metric.clone()))
            .count();
        info!("Added {} metrics for metrics reporting.", added);

        let mut stage = self.stage.lock();
        match mem::replace(&mut *stage, Stage::Closed) {
            Stage::Configured(reporting_loop) => {
                let (done_tx, done) = flume::bounded::<()>(1);
                let handle = thread::Builder::new()
                    .name(THREAD_NAME.into())
                    .spawn(move || {
                        reporting_loop.run();
                        drop(done_tx);
                    })
                    .map_err(ReporterError::Spawn)?;
                *stage = Stage::Running { handle, done };
            }
            Stage::Disabled => {
                info!("Metrics reporter is disabled, not starting the reporting thread.");
                *stage = Stage::Disabled;
            }
            other => {
                warn!("Metrics reporter was already started.");
                *stage = other;
            }
        }
        Ok(())
    }

    /// Host hook for a new or replaced metric. Returns whether it is tracked.
    pub fn metric_change(&self, metric: Arc<dyn TrackedMetric>) -> bool {
        self.table.register(metric)
    }

    /// Host hook for a removed metric.
    pub fn metric_removal(&self, name: &MetricName) -> bool {
        self.table.unregister(name)
    }

    /// Stop reporting and close the producer. Safe to call more than once,
    /// from any thread: every call returns once the loop has stopped or the
    /// close timeout ran out.
    pub fn close(&self) {
        self.state.request_shutdown();
        let mut stage = self.stage.lock();
        match mem::replace(&mut *stage, Stage::Closed) {
            Stage::Running { handle, done } => {
                *stage = Stage::Stopping(done.clone());
                drop(stage);
                info!("Closing metrics reporter.");
                handle.thread().unpark();
                if let Some(publisher) = &self.publisher {
                    publisher.wakeup();
                }
                if wait_for_loop(&done) && handle.join().is_err() {
                    warn!("Metrics reporter thread panicked.");
                }
                self.finish_close();
            }
            // Never started: run it to completion on this thread, which
            // skips every tick and closes the producer.
            Stage::Configured(reporting_loop) => {
                let (done_tx, done) = flume::bounded::<()>(1);
                *stage = Stage::Stopping(done);
                drop(stage);
                reporting_loop.run();
                drop(done_tx);
                self.finish_close();
            }
            Stage::Stopping(done) => {
                *stage = Stage::Stopping(done.clone());
                drop(stage);
                wait_for_loop(&done);
            }
            other @ (Stage::Disabled | Stage::Closed) => *stage = other,
        }
    }

    fn finish_close(&self) {
        let mut stage = self.stage.lock();
        if matches!(*stage, Stage::Stopping(_)) {
            *stage = Stage::Closed;
        }
    }

    pub fn loop_state(&self) -> LoopState {
        self.state.loop_state()
    }

    /// Whether producer construction gave up.
    pub fn is_disabled(&self) -> bool {
        self.publisher.is_none()
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn registered_metrics(&self) -> usize {
        self.table.len()
    }

    /// Sends that failed in the latest tick.
    pub fn send_failures(&self) -> u64 {
        self.state.send_failures()
    }
}

/// Wait for the loop to drop its end of `done`. False on timeout.
fn wait_for_loop(done: &flume::Receiver<()>) -> bool {
    match done.recv_timeout(REPORTER_CLOSE_TIMEOUT) {
        Err(flume::RecvTimeoutError::Timeout) => {
            warn!(
                "Metrics reporter thread did not stop within {:?}.",
                REPORTER_CLOSE_TIMEOUT
            );
            false
        }
        Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => true,
    }
}

impl Drop for MetricsReporter {
    fn drop(&mut self) {
        self.close();
    }
}
