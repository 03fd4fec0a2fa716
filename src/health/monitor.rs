//! Periodic active health monitoring.
//!
//! # Responsibilities
//! - Run one probe class against one node on an interval
//! - Bound each probe with a timeout
//! - Translate probe outcomes into failure tracker updates
//!
//! # Outcome mapping
//! ```text
//! Success → unset Monitor (and a Fade this runner set)
//! Fade    → set Fade for FADE_TTL
//! Timeout → set Monitor (no expiry)
//! Error   → set Monitor (no expiry)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{ClusterConfig, MonitorConfig, MonitorKind};
use crate::health::{ConnectMonitor, ExpectMonitor, FailureManager, FailureStatus, HttpMonitor};

/// How long a monitor-reported fade lasts without being renewed.
pub const FADE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("expectation failed")]
    ExpectationFailed,

    #[error("HTTP probe failed: {0}")]
    Http(String),
}

/// Healthy answers a probe may give.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Success,
    /// Alive, but asks not to receive new sessions.
    Fade,
}

/// Everything a probe round can end with.
#[derive(Debug)]
pub enum MonitorOutcome {
    Success,
    Fade,
    Timeout,
    Error(MonitorError),
}

/// A probe implementation.
pub trait MonitorClass: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, addr: SocketAddr) -> BoxFuture<'_, Result<MonitorStatus, MonitorError>>;
}

/// Build the probe class configured for `cluster`, if any.
pub fn monitor_class(cluster: &ClusterConfig) -> Option<Arc<dyn MonitorClass>> {
    match cluster.monitor {
        MonitorKind::None => None,
        MonitorKind::Connect => Some(Arc::new(ConnectMonitor)),
        MonitorKind::Expect => Some(Arc::new(ExpectMonitor::new(
            cluster.send.clone(),
            cluster.expect.clone(),
            cluster.fade_expect.clone(),
        ))),
        MonitorKind::Http => Some(Arc::new(HttpMonitor::new(cluster.path.clone()))),
    }
}

pub struct MonitorRunner {
    class: Arc<dyn MonitorClass>,
    addr: SocketAddr,
    failures: Arc<FailureManager>,
    interval: Duration,
    timeout: Duration,
    /// This runner set the current Fade.
    faded: bool,
}

impl MonitorRunner {
    pub fn new(
        class: Arc<dyn MonitorClass>,
        addr: SocketAddr,
        failures: Arc<FailureManager>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            class,
            addr,
            failures,
            interval: Duration::from_secs(config.interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            faded: false,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            addr = %self.addr,
            monitor = self.class.name(),
            interval_secs = self.interval.as_secs(),
            "Monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.check_once().await;
                    self.apply(outcome);
                }
                _ = shutdown.recv() => {
                    tracing::info!(addr = %self.addr, "Monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn check_once(&self) -> MonitorOutcome {
        match time::timeout(self.timeout, self.class.check(self.addr)).await {
            Ok(Ok(MonitorStatus::Success)) => MonitorOutcome::Success,
            Ok(Ok(MonitorStatus::Fade)) => MonitorOutcome::Fade,
            Ok(Err(e)) => MonitorOutcome::Error(e),
            Err(_) => MonitorOutcome::Timeout,
        }
    }

    pub fn apply(&mut self, outcome: MonitorOutcome) {
        let addr = self.addr;
        match outcome {
            MonitorOutcome::Success => {
                if self.failures.get_status(addr) == FailureStatus::Monitor {
                    tracing::info!(addr = %addr, monitor = self.class.name(), "Node is back up");
                }
                self.failures.unset(addr, FailureStatus::Monitor);
                if std::mem::take(&mut self.faded) {
                    self.failures.unset(addr, FailureStatus::Fade);
                }
            }
            MonitorOutcome::Fade => {
                tracing::info!(addr = %addr, monitor = self.class.name(), "Node is fading");
                self.failures.unset(addr, FailureStatus::Monitor);
                self.failures.set(addr, FailureStatus::Fade, Some(FADE_TTL));
                self.faded = true;
            }
            MonitorOutcome::Timeout => {
                tracing::warn!(addr = %addr, monitor = self.class.name(), "Monitor timed out");
                self.failures.set(addr, FailureStatus::Monitor, None);
            }
            MonitorOutcome::Error(e) => {
                tracing::warn!(addr = %addr, monitor = self.class.name(), error = %e, "Monitor check failed");
                self.failures.set(addr, FailureStatus::Monitor, None);
            }
        }
    }
}

/// Spawn one runner per distinct monitored node.
pub fn spawn_monitors(
    clusters: &[ClusterConfig],
    config: &MonitorConfig,
    failures: &Arc<FailureManager>,
    shutdown: &crate::lifecycle::Shutdown,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut seen = std::collections::HashSet::new();
    let mut handles = Vec::new();

    for cluster in clusters {
        let Some(class) = monitor_class(cluster) else {
            continue;
        };
        for node in &cluster.nodes {
            let Ok(addr) = node.parse::<SocketAddr>() else {
                continue;
            };
            if !seen.insert((addr, class.name())) {
                continue;
            }
            let runner = MonitorRunner::new(class.clone(), addr, failures.clone(), config);
            handles.push(tokio::spawn(runner.run(shutdown.subscribe())));
        }
    }

    handles
}
