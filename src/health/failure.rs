//! Per-address failure tracker.
//!
//! # Responsibilities
//! - Remember the most severe recent failure of each backend address
//! - Expire records lazily: an expired record reads as `Ok`
//! - Decide whether an address may receive new or sticky traffic
//!
//! # Severity
//! ```text
//! Ok < Fade < Response < Connect < Monitor
//! ```
//! A less severe update never replaces a more severe record that has not
//! expired.  Only `unset` of the same status (or `Ok`, which clears
//! everything) or expiry removes it.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Ok,
    /// Administratively draining: no new sessions, sticky ones continue.
    Fade,
    /// The backend answered with a broken or failed response.
    Response,
    /// Connecting to the backend failed.
    Connect,
    /// An active monitor reported the backend down.
    Monitor,
}

impl FailureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStatus::Ok => "ok",
            FailureStatus::Fade => "fade",
            FailureStatus::Response => "response",
            FailureStatus::Connect => "connect",
            FailureStatus::Monitor => "monitor",
        }
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    status: FailureStatus,
    /// `None` never expires.
    expires: Option<Instant>,
}

impl FailureRecord {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|expires| now >= expires)
    }
}

/// Shared failure tracker, constructed once and injected into the balancer,
/// the HTTP client, the monitors and the control handler.
#[derive(Debug, Default)]
pub struct FailureManager {
    records: DashMap<SocketAddr, FailureRecord>,
}

impl FailureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for `addr`, expiring after `ttl` (`None`: until
    /// explicitly unset).  Setting `Ok` is the same as [`Self::unset`] with
    /// `Ok`.
    pub fn set(&self, addr: SocketAddr, status: FailureStatus, ttl: Option<Duration>) {
        self.set_at(addr, status, ttl, Instant::now());
    }

    pub fn set_at(
        &self,
        addr: SocketAddr,
        status: FailureStatus,
        ttl: Option<Duration>,
        now: Instant,
    ) {
        if status == FailureStatus::Ok {
            self.unset(addr, FailureStatus::Ok);
            return;
        }

        let record = FailureRecord {
            status,
            expires: ttl.map(|ttl| now + ttl),
        };

        let mut entry = self.records.entry(addr).or_insert(record);
        let current = *entry;
        if status < current.status && !current.is_expired(now) {
            return;
        }
        *entry = record;
        drop(entry);

        tracing::debug!(addr = %addr, status = %status, ttl = ?ttl, "Failure recorded");
        metrics::record_node_status(addr, status);
    }

    /// Clear `status` for `addr`.  `Ok` clears whatever is recorded; any
    /// other status only clears a record of exactly that status.
    pub fn unset(&self, addr: SocketAddr, status: FailureStatus) {
        let removed = self
            .records
            .remove_if(&addr, |_, record| {
                status == FailureStatus::Ok || record.status == status
            })
            .is_some();

        if removed {
            tracing::debug!(addr = %addr, status = %status, "Failure cleared");
            metrics::record_node_status(addr, self.get_status(addr));
        }
    }

    pub fn get_status(&self, addr: SocketAddr) -> FailureStatus {
        self.get_status_at(addr, Instant::now())
    }

    pub fn get_status_at(&self, addr: SocketAddr, now: Instant) -> FailureStatus {
        match self.records.get(&addr) {
            Some(record) if !record.is_expired(now) => record.status,
            _ => FailureStatus::Ok,
        }
    }

    /// May `addr` receive a new session?
    pub fn check(&self, addr: SocketAddr) -> bool {
        self.get_status(addr) == FailureStatus::Ok
    }

    /// May `addr` keep serving an existing sticky session?  Fading nodes
    /// still qualify.
    pub fn check_sticky(&self, addr: SocketAddr) -> bool {
        self.get_status(addr) <= FailureStatus::Fade
    }

    /// Drop expired records.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.records.retain(|_, record| !record.is_expired(now));
    }

    /// Addresses with a current, non-`Ok` status.
    pub fn failed_nodes(&self) -> Vec<(SocketAddr, FailureStatus)> {
        let now = Instant::now();
        self.records
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (*entry.key(), entry.value().status))
            .collect()
    }
}
