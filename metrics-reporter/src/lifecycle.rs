//! One-time create-or-reconcile of the metrics topic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::admin::{AlterConfigOp, CreateOutcome, TopicAdmin};
use crate::error::AdminError;
use crate::retry::{Attempt, Backoff, RetryError, retry_until};
use crate::state::ReporterState;
use crate::topic::TopicSpec;

/// Bound on every describe/alter/partition call.
pub const ADMIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period when closing the admin client.
pub const ADMIN_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// What reconciling an existing topic changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Config keys that were altered.
    pub altered: Vec<String>,
    pub partitions_increased_to: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    Reconciled(Reconciliation),
    /// Creation failed or ran out of attempts. The reporter carries on.
    GaveUp,
}

pub struct TopicProvisioner {
    admin: Box<dyn TopicAdmin>,
    spec: TopicSpec,
    create_timeout: Duration,
    create_retries: u32,
    backoff: Backoff,
    state: Option<Arc<ReporterState>>,
}

impl std::fmt::Debug for TopicProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicProvisioner")
            .field("spec", &self.spec)
            .field("create_timeout", &self.create_timeout)
            .field("create_retries", &self.create_retries)
            .finish_non_exhaustive()
    }
}

impl TopicProvisioner {
    pub fn new(admin: Box<dyn TopicAdmin>, spec: TopicSpec) -> Self {
        Self {
            admin,
            spec,
            create_timeout: ADMIN_REQUEST_TIMEOUT,
            create_retries: 5,
            backoff: Backoff::default(),
            state: None,
        }
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    pub fn with_create_retries(mut self, retries: u32) -> Self {
        self.create_retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stop retrying once shutdown is requested on `state`.
    pub fn with_state(mut self, state: Arc<ReporterState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Create the topic, or bring an existing one in line with the desired state.
    /// Failures are logged and never returned. The admin client is closed
    /// before this returns.
    #[tracing::instrument(name = "provision", skip_all, fields(topic = self.spec.name()))]
    pub fn provision(self) -> ProvisionOutcome {
        let outcome = match self.create() {
            Ok(CreateOutcome::Created) => {
                info!("Metrics topic {} was created.", self.spec.name());
                ProvisionOutcome::Created
            }
            Ok(CreateOutcome::AlreadyExists) => {
                info!(
                    "Metrics topic {} already exists. Reconciling its configuration.",
                    self.spec.name()
                );
                ProvisionOutcome::Reconciled(self.reconcile())
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(
                    "Unable to create metrics topic {} after {} attempts: {}",
                    self.spec.name(),
                    attempts,
                    last
                );
                ProvisionOutcome::GaveUp
            }
            Err(RetryError::Aborted(e)) => {
                warn!("Unable to create metrics topic {}: {}", self.spec.name(), e);
                ProvisionOutcome::GaveUp
            }
        };
        self.admin.close(ADMIN_CLOSE_TIMEOUT);
        outcome
    }

    fn create(&self) -> Result<CreateOutcome, RetryError<AdminError>> {
        retry_until(self.create_retries, self.backoff, || self.is_shutdown(), |attempt| {
            if self.is_shutdown() {
                return Attempt::Abort(AdminError::Interrupted);
            }
            match self.admin.create_topic(&self.spec, self.create_timeout) {
                Ok(outcome) => Attempt::Done(outcome),
                Err(e @ (AdminError::Timeout(_) | AdminError::Execution(_) | AdminError::Interrupted)) => {
                    warn!(
                        "Attempt {} to create metrics topic {} failed: {}",
                        attempt,
                        self.spec.name(),
                        e
                    );
                    Attempt::Retry(e)
                }
                Err(e) => Attempt::Abort(e),
            }
        })
    }

    fn is_shutdown(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_shutdown())
    }

    fn reconcile(&self) -> Reconciliation {
        Reconciliation {
            altered: self.reconcile_configs(),
            partitions_increased_to: self.reconcile_partitions(),
        }
    }

    fn reconcile_configs(&self) -> Vec<String> {
        let topic = self.spec.name();
        let current = match self.admin.describe_configs(topic, ADMIN_REQUEST_TIMEOUT) {
            Ok(current) => current,
            Err(e) => {
                warn!("Unable to describe config of metrics topic {}: {}", topic, e);
                return Vec::new();
            }
        };
        let ops = config_diff(&self.spec, &current);
        if ops.is_empty() {
            debug!("Config of metrics topic {} is up to date.", topic);
            return Vec::new();
        }
        match self.admin.incremental_alter_configs(topic, &ops, ADMIN_REQUEST_TIMEOUT) {
            Ok(()) => {
                let altered: Vec<String> = ops.into_iter().map(|op| op.key).collect();
                info!("Updated config {:?} of metrics topic {}.", altered, topic);
                altered
            }
            Err(e) => {
                warn!("Unable to update config of metrics topic {}: {}", topic, e);
                Vec::new()
            }
        }
    }

    fn reconcile_partitions(&self) -> Option<usize> {
        let topic = self.spec.name();
        let desired = usize::try_from(self.spec.partitions()).ok()?;
        let current = match self.admin.partition_count(topic, ADMIN_REQUEST_TIMEOUT) {
            Ok(current) => current,
            Err(e) => {
                warn!("Unable to describe partitions of metrics topic {}: {}", topic, e);
                return None;
            }
        };
        if current >= desired {
            return None;
        }
        match self.admin.create_partitions(topic, desired, ADMIN_REQUEST_TIMEOUT) {
            Ok(()) => {
                info!(
                    "Increased the partition count of metrics topic {} from {} to {}.",
                    topic, current, desired
                );
                Some(desired)
            }
            Err(AdminError::ReassignmentInProgress(_)) => {
                warn!(
                    "Unable to increase the partition count of metrics topic {} to {}: \
                     a partition reassignment is in progress.",
                    topic, desired
                );
                None
            }
            Err(e) => {
                warn!(
                    "Unable to increase the partition count of metrics topic {} to {}: {}",
                    topic, desired, e
                );
                None
            }
        }
    }
}

/// SET operations for the reconciled configs whose current value differs.
/// Other keys are never touched.
pub fn config_diff(spec: &TopicSpec, current: &BTreeMap<String, String>) -> Vec<AlterConfigOp> {
    spec.reconciled_configs()
        .into_iter()
        .filter(|(key, desired)| current.get(*key) != Some(desired))
        .map(|(key, desired)| AlterConfigOp::set(key, desired))
        .collect()
}
