//! Local network link driver.
//!
//! The node has no visibility into the access network beyond "can I open a
//! socket to somewhere outside", so the network link is supervised with a
//! bounded TCP reachability probe. While the link is up the probe is
//! re-run at a relaxed interval rather than every tick; while it is down
//! the [`LinkMonitor`] backoff schedule applies.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{LinkMonitor, LinkState, RetryExhausted};
use crate::config::NetworkConfig;

pub struct NetworkLink {
    monitor: LinkMonitor,
    target: String,
    probe_timeout: Duration,
    recheck: Duration,
    last_ok: Option<Instant>,
}

impl NetworkLink {
    pub fn new(cfg: &NetworkConfig) -> Self {
        NetworkLink {
            monitor: LinkMonitor::new(
                "network",
                Duration::from_secs(cfg.backoff_base_secs),
                Duration::from_secs(cfg.backoff_cap_secs),
                cfg.max_retries,
            ),
            target: format!("{}:{}", cfg.probe_host, cfg.probe_port),
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
            recheck: Duration::from_secs(cfg.recheck_secs),
            last_ok: None,
        }
    }

    pub fn is_up(&self) -> bool {
        self.monitor.state() == LinkState::Connected
    }

    /// Service the link once. Performs at most one probe; never waits
    /// longer than the configured probe timeout.
    pub async fn maintain(&mut self) -> Result<(), RetryExhausted> {
        let now = Instant::now();
        match self.monitor.state() {
            LinkState::Connected => {
                let fresh = self
                    .last_ok
                    .map(|at| now.duration_since(at) < self.recheck)
                    .unwrap_or(false);
                if fresh {
                    return Ok(());
                }
                if self.reachable().await {
                    self.last_ok = Some(now);
                } else {
                    warn!("network probe to {} lost", self.target);
                    self.monitor.dropped();
                }
                Ok(())
            }
            LinkState::Disconnected | LinkState::Connecting => {
                if !self.monitor.attempt_due(now) {
                    return Ok(());
                }
                self.monitor.begin_attempt(now);
                debug!(
                    "network probe attempt {} to {}",
                    self.monitor.retries() + 1,
                    self.target
                );
                if self.reachable().await {
                    info!("network reachable via {}", self.target);
                    self.last_ok = Some(now);
                    self.monitor.connected();
                    Ok(())
                } else {
                    match self.monitor.attempt_failed() {
                        Some(fatal) => Err(fatal),
                        None => Ok(()),
                    }
                }
            }
        }
    }

    async fn reachable(&self) -> bool {
        match timeout(self.probe_timeout, TcpStream::connect(self.target.as_str())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("network probe {} failed: {}", self.target, e);
                false
            }
            Err(_) => {
                debug!("network probe {} timed out", self.target);
                false
            }
        }
    }
}
