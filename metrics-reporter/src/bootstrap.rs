//! Bootstrap address derivation and retrying producer construction.

use std::error::Error;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Properties, client};
use crate::error::{ConfigError, ProducerError};
use crate::producer::{ProducerFactory, RecordProducer};
use crate::retry::{Attempt, Backoff, RetryError, retry};

pub const DEFAULT_BOOTSTRAP_HOST: &str = "localhost";
pub const DEFAULT_BOOTSTRAP_PORT: &str = "9092";

/// Derive `host:port` from the host's listener list.
///
/// Only the first listener is used, so its position in the list matters.
/// An explicit `port` overrides the listener's own port, and an empty
/// listener host falls back to `localhost`.
pub fn bootstrap_servers(listeners: Option<&str>, port: Option<&str>) -> String {
    if let Some(listeners) = listeners.filter(|l| !l.is_empty()) {
        let first = listeners.split(',').next().unwrap_or_default().trim();
        let protocol_host_port: Vec<&str> = first.split(':').collect();
        let port = port.unwrap_or_else(|| protocol_host_port.last().copied().unwrap_or_default());
        let host = protocol_host_port
            .get(1)
            .map(|host| host.strip_prefix("//").unwrap_or(host))
            .filter(|host| !host.is_empty())
            .unwrap_or(DEFAULT_BOOTSTRAP_HOST);
        return format!("{}:{}", host, port);
    }
    format!(
        "{}:{}",
        DEFAULT_BOOTSTRAP_HOST,
        port.unwrap_or(DEFAULT_BOOTSTRAP_PORT)
    )
}

/// Resolve every entry of a comma separated `host:port` list.
pub fn resolve_bootstrap_servers(servers: &str) -> Result<Vec<SocketAddr>, ConfigError> {
    let mut resolved = Vec::new();
    for server in servers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let addrs = server
            .to_socket_addrs()
            .map_err(|_| ConfigError::UnresolvedBootstrap(server.to_owned()))?;
        resolved.extend(addrs);
    }
    if resolved.is_empty() {
        return Err(ConfigError::UnresolvedBootstrap(servers.to_owned()));
    }
    Ok(resolved)
}

fn root_config_error(err: &ProducerError) -> Option<&ConfigError> {
    let mut current: Option<&(dyn Error + 'static)> = Some(err);
    let mut found = None;
    while let Some(e) = current {
        if let Some(config) = e.downcast_ref::<ConfigError>() {
            found = Some(config);
        }
        current = e.source();
    }
    found
}

/// Whether a construction failure looks like DNS not being ready yet.
///
/// A configuration error is retried when its root cause is an unresolved
/// bootstrap address, or when the configured addresses still fail to
/// resolve on a second look.
pub fn is_retryable(err: &ProducerError, config: &Properties) -> bool {
    match root_config_error(err) {
        Some(ConfigError::UnresolvedBootstrap(_)) => true,
        Some(_) => config
            .get(client::BOOTSTRAP_SERVERS)
            .is_some_and(|servers| match resolve_bootstrap_servers(servers) {
                Ok(_) => false,
                Err(e) => {
                    warn!("Unable to create metrics producer: {}", e);
                    true
                }
            }),
        None => false,
    }
}

/// Build the publishing client, retrying DNS-related failures up to
/// `max_attempts` times. Any other failure is returned as
/// [`RetryError::Aborted`] without retrying.
#[tracing::instrument(name = "producer_build", skip_all, fields(
    bootstrap = config.get(client::BOOTSTRAP_SERVERS).unwrap_or_default(),
    max_attempts = max_attempts
))]
pub fn build_producer(
    factory: &dyn ProducerFactory,
    config: &Properties,
    max_attempts: u32,
    backoff: Backoff,
) -> Result<Arc<dyn RecordProducer>, RetryError<ProducerError>> {
    let producer = retry(max_attempts, backoff, |attempt| match factory.create(config) {
        Ok(producer) => Attempt::Done(producer),
        Err(e) if is_retryable(&e, config) => {
            warn!("Unable to create metrics producer on attempt {}: {}", attempt, e);
            Attempt::Retry(e)
        }
        Err(e) => Attempt::Abort(e),
    })?;
    info!("Metrics producer created.");
    Ok(producer)
}
