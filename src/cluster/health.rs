//! Background Node Health Monitor
//!
//! Periodically probes every node with a HEAD request for a well-known key and
//! feeds the outcome back into the [`Scheduler`]. This is how a primary that
//! was marked unreachable gets write traffic again without waiting for its
//! mark to expire.

use crate::cluster::Scheduler;
use crate::domain::ports::ObjectBackendRef;
use crate::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle to a running health monitor; the task stops when this is dropped
pub struct HealthMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the probe loop on the current tokio runtime
    pub fn spawn(
        scheduler: Arc<Scheduler>,
        backends: Vec<ObjectBackendRef>,
        probe_key: String,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                nodes = backends.len(),
                "Node health monitor started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let reachable =
                            probe_once(&scheduler, &backends, &probe_key, probe_timeout).await;
                        debug!(reachable, total = backends.len(), "Health probe round complete");
                    }
                }
            }

            info!("Node health monitor stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop probing and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Probe every node once, returning how many answered
///
/// A node answers if HEAD succeeds or the node reports a definite status
/// (missing key, access denied). Only transport failures and timeouts count
/// against it.
pub async fn probe_once(
    scheduler: &Scheduler,
    backends: &[ObjectBackendRef],
    probe_key: &str,
    probe_timeout: Duration,
) -> usize {
    let object = probe_key.trim_start_matches('/');
    let probes = scheduler.registry().nodes().iter().map(|node| {
        let backend = backends.get(node.index()).cloned();
        async move {
            let Some(backend) = backend else {
                return (node, Err(Error::Internal(format!("no backend for node {}", node.id()))));
            };
            let outcome = match tokio::time::timeout(probe_timeout, backend.head_object(object)).await
            {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(Error::Timeout {
                    node: node.id().to_string(),
                    operation: "probe".into(),
                    elapsed: probe_timeout,
                }),
            };
            (node, outcome)
        }
    });

    let mut reachable = 0;
    for (node, outcome) in futures::future::join_all(probes).await {
        match outcome {
            Err(e) if e.is_retryable() => scheduler.report_failure(node, &e),
            Err(Error::Internal(_)) => {}
            _ => {
                reachable += 1;
                scheduler.report_success(node);
            }
        }
    }
    reachable
}
