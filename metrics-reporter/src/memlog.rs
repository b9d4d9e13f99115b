//! In-process partitioned log.
//!
//! Implements the producer and admin contracts on top of shared memory so
//! the reporter can run end to end without a cluster. Every client has
//! fault injection and call accounting for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sha2::{Digest, Sha256};
use strum::{Display, EnumIter};
use tracing::{debug, trace, warn};

use crate::admin::{AdminFactory, AlterConfigOp, CreateOutcome, TopicAdmin};
use crate::config::{Properties, client};
use crate::error::{AdminError, ConfigError, ProducerError};
use crate::producer::{DeliveryCallback, ProducerFactory, ProducerRecord, RecordMetadata, RecordProducer};
use crate::topic::{CLEANUP_POLICY_CONFIG, MIN_INSYNC_REPLICAS_CONFIG, RETENTION_MS_CONFIG, TopicSpec};

/// Configs every new topic starts with.
pub fn default_topic_configs() -> BTreeMap<String, String> {
    BTreeMap::from([
        (RETENTION_MS_CONFIG.to_owned(), "604800000".to_owned()),
        (CLEANUP_POLICY_CONFIG.to_owned(), "delete".to_owned()),
        (MIN_INSYNC_REPLICAS_CONFIG.to_owned(), "1".to_owned()),
    ])
}

/// A record as appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: String,
    pub timestamp_ms: i64,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: u64,
}

#[derive(Debug)]
struct TopicLog {
    configs: BTreeMap<String, String>,
    /// Next offset of each partition.
    next_offsets: Vec<u64>,
    records: Vec<StoredRecord>,
}

impl TopicLog {
    fn new(partitions: usize, configs: BTreeMap<String, String>) -> Self {
        Self {
            configs,
            next_offsets: vec![0; partitions.max(1)],
            records: Vec::new(),
        }
    }
}

/// Partition of `key` among `partitions`.
pub fn partition_for(key: &str, partitions: usize) -> i32 {
    let digest = Sha256::digest(key.as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (hash as usize % partitions.max(1)) as i32
}

/// Shared topic storage. Clones refer to the same cluster.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    topics: Arc<Mutex<BTreeMap<String, TopicLog>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `name` unless it exists. Returns whether it was created.
    pub fn create_topic(&self, name: &str, partitions: usize, configs: BTreeMap<String, String>) -> bool {
        let mut topics = self.topics.lock();
        if topics.contains_key(name) {
            return false;
        }
        let mut all = default_topic_configs();
        all.extend(configs);
        topics.insert(name.to_owned(), TopicLog::new(partitions, all));
        true
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.topics.lock().contains_key(name)
    }

    pub fn partition_count(&self, name: &str) -> Option<usize> {
        self.topics.lock().get(name).map(|log| log.next_offsets.len())
    }

    pub fn topic_configs(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.topics.lock().get(name).map(|log| log.configs.clone())
    }

    /// Records of `name` in append order.
    pub fn records(&self, name: &str) -> Vec<StoredRecord> {
        self.topics
            .lock()
            .get(name)
            .map(|log| log.records.clone())
            .unwrap_or_default()
    }

    fn alter_configs(&self, name: &str, ops: &[AlterConfigOp]) -> bool {
        let mut topics = self.topics.lock();
        let Some(log) = topics.get_mut(name) else {
            return false;
        };
        for op in ops {
            log.configs.insert(op.key.clone(), op.value.clone());
        }
        true
    }

    fn grow_partitions(&self, name: &str, total: usize) -> Result<(), AdminError> {
        let mut topics = self.topics.lock();
        let log = topics
            .get_mut(name)
            .ok_or_else(|| AdminError::UnknownTopic(name.to_owned()))?;
        if total <= log.next_offsets.len() {
            return Err(AdminError::InvalidPartitions(format!(
                "topic {} already has {} partitions, requested {}",
                name,
                log.next_offsets.len(),
                total
            )));
        }
        log.next_offsets.resize(total, 0);
        Ok(())
    }

    /// Append one record, creating the topic with a single partition if needed.
    fn append(&self, record: ProducerRecord) -> RecordMetadata {
        let mut topics = self.topics.lock();
        let log = topics
            .entry(record.topic.clone())
            .or_insert_with(|| TopicLog::new(1, default_topic_configs()));
        let partition = partition_for(&record.key, log.next_offsets.len());
        let next = &mut log.next_offsets[partition as usize];
        let offset = *next;
        *next += 1;
        log.records.push(StoredRecord {
            key: record.key,
            timestamp_ms: record.timestamp_ms,
            value: record.value,
            partition,
            offset,
        });
        RecordMetadata {
            topic: record.topic,
            partition,
            offset,
            timestamp_ms: record.timestamp_ms,
        }
    }
}

struct Delivery {
    record: ProducerRecord,
    callback: DeliveryCallback,
}

#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    changed: Condvar,
}

impl Inflight {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }
}

#[derive(Default)]
struct Faults {
    fail_next_sends: AtomicU32,
    /// Set when the close grace period ran out.
    aborted: AtomicBool,
}

/// Producer that delivers on its own thread.
pub struct MemoryProducer {
    sender: Mutex<Option<flume::Sender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    inflight: Arc<Inflight>,
    faults: Arc<Faults>,
    interrupted: AtomicBool,
    close_calls: AtomicUsize,
}

impl std::fmt::Debug for MemoryProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProducer")
            .field("inflight", &*self.inflight.count.lock())
            .field("close_calls", &self.close_calls)
            .finish_non_exhaustive()
    }
}

impl MemoryProducer {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self::with_delivery_delay(cluster, Duration::ZERO)
    }

    /// Producer whose deliveries each take `delay`.
    pub fn with_delivery_delay(cluster: MemoryCluster, delay: Duration) -> Self {
        let (tx, rx) = flume::unbounded::<Delivery>();
        let inflight = Arc::new(Inflight::default());
        let faults = Arc::new(Faults::default());
        let worker = {
            let inflight = inflight.clone();
            let faults = faults.clone();
            thread::Builder::new()
                .name("memlog-producer".into())
                .spawn(move || {
                    for Delivery { record, callback } in rx.iter() {
                        if !delay.is_zero() && !faults.aborted.load(Ordering::Acquire) {
                            thread::sleep(delay);
                        }
                        let result = if faults.aborted.load(Ordering::Acquire) {
                            Err(ProducerError::Closed)
                        } else if faults
                            .fail_next_sends
                            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                            .is_ok()
                        {
                            Err(ProducerError::Send("injected failure".into()))
                        } else {
                            Ok(cluster.append(record))
                        };
                        trace!("Delivered record: {:?}", result);
                        callback(result);
                        inflight.done();
                    }
                })
        };
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn the delivery thread: {}", e);
                None
            }
        };
        let sender = worker.as_ref().map(|_| tx);
        Self {
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
            inflight,
            faults,
            interrupted: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` deliveries with a send error.
    pub fn fail_next_sends(&self, n: u32) {
        self.faults.fail_next_sends.store(n, Ordering::Release);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        *self.inflight.count.lock()
    }

    fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::AcqRel)
    }
}

impl RecordProducer for MemoryProducer {
    fn send(&self, record: ProducerRecord, on_delivery: DeliveryCallback) {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            on_delivery(Err(ProducerError::Closed));
            return;
        };
        self.inflight.add();
        if let Err(flume::SendError(delivery)) = tx.send(Delivery {
            record,
            callback: on_delivery,
        }) {
            self.inflight.done();
            (delivery.callback)(Err(ProducerError::Closed));
        }
    }

    fn flush(&self) -> Result<(), ProducerError> {
        let mut count = self.inflight.count.lock();
        loop {
            if self.take_interrupt() {
                return Err(ProducerError::Interrupted);
            }
            if *count == 0 {
                return Ok(());
            }
            self.inflight
                .changed
                .wait_for(&mut count, Duration::from_millis(10));
        }
    }

    fn wakeup(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.inflight.changed.notify_all();
    }

    fn close(&self, timeout: Duration) {
        self.close_calls.fetch_add(1, Ordering::AcqRel);
        // Dropping the sender ends the delivery loop once the queue drains.
        if self.sender.lock().take().is_none() {
            return;
        }
        let deadline = Instant::now() + timeout;
        {
            let mut count = self.inflight.count.lock();
            while *count > 0 {
                if self.inflight.changed.wait_until(&mut count, deadline).timed_out() {
                    warn!("{} sends still in flight after {:?}, failing them.", *count, timeout);
                    self.faults.aborted.store(true, Ordering::Release);
                    break;
                }
            }
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Delivery thread panicked.");
            }
        }
        debug!("Memory producer closed.");
    }
}

/// Creates [`MemoryProducer`]s, optionally failing the first attempts.
#[derive(Debug, Default)]
pub struct MemoryProducerFactory {
    cluster: MemoryCluster,
    delivery_delay: Duration,
    unresolved_failures: AtomicU32,
    fatal: AtomicBool,
    attempts: AtomicU32,
    last: Mutex<Option<Arc<MemoryProducer>>>,
}

impl MemoryProducerFactory {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            ..Default::default()
        }
    }

    pub fn with_delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }

    /// Fail the next `n` attempts as if the bootstrap address did not resolve.
    pub fn fail_resolution(&self, n: u32) {
        self.unresolved_failures.store(n, Ordering::Release);
    }

    /// Fail every attempt with a non-retryable error.
    pub fn fail_fatally(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The most recently created producer.
    pub fn last_producer(&self) -> Option<Arc<MemoryProducer>> {
        self.last.lock().clone()
    }
}

impl ProducerFactory for MemoryProducerFactory {
    fn create(&self, config: &Properties) -> Result<Arc<dyn RecordProducer>, ProducerError> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        if self.fatal.load(Ordering::Acquire) {
            return Err(ProducerError::Other("producer construction failed".into()));
        }
        let servers = config
            .get(client::BOOTSTRAP_SERVERS)
            .ok_or_else(|| ProducerError::Config(ConfigError::Missing(client::BOOTSTRAP_SERVERS.into())))?;
        if self
            .unresolved_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProducerError::Config(ConfigError::UnresolvedBootstrap(
                servers.to_owned(),
            )));
        }
        let producer = Arc::new(MemoryProducer::with_delivery_delay(
            self.cluster.clone(),
            self.delivery_delay,
        ));
        *self.last.lock() = Some(producer.clone());
        Ok(producer)
    }
}

/// Operations counted by [`MemoryAdmin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum AdminOp {
    CreateTopic,
    DescribeConfigs,
    AlterConfigs,
    PartitionCount,
    CreatePartitions,
    Close,
}

#[derive(Debug, Default)]
struct AdminShared {
    calls: Mutex<HashMap<AdminOp, usize>>,
    altered: Mutex<Vec<AlterConfigOp>>,
    closed: AtomicBool,
    fail_creates: AtomicU32,
    fail_describe: AtomicBool,
    reassignment_in_progress: AtomicBool,
}

/// Admin client over a [`MemoryCluster`]. Clones share call counts and
/// faults, so a test keeps one clone while the reporter owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdmin {
    cluster: MemoryCluster,
    shared: Arc<AdminShared>,
}

impl MemoryAdmin {
    pub fn new(cluster: MemoryCluster) -> Self {
        Self {
            cluster,
            shared: Arc::default(),
        }
    }

    pub fn calls(&self, op: AdminOp) -> usize {
        self.shared.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Every alter operation applied so far.
    pub fn altered(&self) -> Vec<AlterConfigOp> {
        self.shared.altered.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Time out the next `n` create requests.
    pub fn fail_creates(&self, n: u32) {
        self.shared.fail_creates.store(n, Ordering::Release);
    }

    pub fn fail_describe(&self, fail: bool) {
        self.shared.fail_describe.store(fail, Ordering::Release);
    }

    pub fn reassignment_in_progress(&self, active: bool) {
        self.shared.reassignment_in_progress.store(active, Ordering::Release);
    }

    fn call(&self, op: AdminOp) -> Result<(), AdminError> {
        *self.shared.calls.lock().entry(op).or_default() += 1;
        if op != AdminOp::Close && self.is_closed() {
            return Err(AdminError::Closed);
        }
        Ok(())
    }
}

impl TopicAdmin for MemoryAdmin {
    fn create_topic(&self, spec: &TopicSpec, timeout: Duration) -> Result<CreateOutcome, AdminError> {
        self.call(AdminOp::CreateTopic)?;
        if self
            .shared
            .fail_creates
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AdminError::Timeout(timeout));
        }
        let partitions = usize::try_from(spec.partitions())
            .map_err(|e| AdminError::InvalidPartitions(e.to_string()))?;
        if self.cluster.create_topic(spec.name(), partitions, spec.configs()) {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    fn describe_configs(&self, topic: &str, _timeout: Duration) -> Result<BTreeMap<String, String>, AdminError> {
        self.call(AdminOp::DescribeConfigs)?;
        if self.shared.fail_describe.load(Ordering::Acquire) {
            return Err(AdminError::Execution("describe configs failed".into()));
        }
        self.cluster
            .topic_configs(topic)
            .ok_or_else(|| AdminError::UnknownTopic(topic.to_owned()))
    }

    fn incremental_alter_configs(
        &self,
        topic: &str,
        ops: &[AlterConfigOp],
        _timeout: Duration,
    ) -> Result<(), AdminError> {
        self.call(AdminOp::AlterConfigs)?;
        if !self.cluster.alter_configs(topic, ops) {
            return Err(AdminError::UnknownTopic(topic.to_owned()));
        }
        self.shared.altered.lock().extend_from_slice(ops);
        Ok(())
    }

    fn partition_count(&self, topic: &str, _timeout: Duration) -> Result<usize, AdminError> {
        self.call(AdminOp::PartitionCount)?;
        self.cluster
            .partition_count(topic)
            .ok_or_else(|| AdminError::UnknownTopic(topic.to_owned()))
    }

    fn create_partitions(&self, topic: &str, total: usize, _timeout: Duration) -> Result<(), AdminError> {
        self.call(AdminOp::CreatePartitions)?;
        if self.shared.reassignment_in_progress.load(Ordering::Acquire) {
            return Err(AdminError::ReassignmentInProgress(topic.to_owned()));
        }
        self.cluster.grow_partitions(topic, total)
    }

    fn close(&self, _timeout: Duration) {
        let _ = self.call(AdminOp::Close);
        self.shared.closed.store(true, Ordering::Release);
    }
}

impl AdminFactory for MemoryAdmin {
    fn create(&self, _config: &Properties) -> Result<Box<dyn TopicAdmin>, AdminError> {
        Ok(Box::new(self.clone()))
    }
}
