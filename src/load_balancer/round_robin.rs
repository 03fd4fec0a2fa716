//! Address selection: round-robin with failure awareness, or sticky.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::health::FailureManager;

/// The nodes of one cluster plus its round-robin cursor.
#[derive(Debug, Default)]
pub struct AddressList {
    addresses: Vec<SocketAddr>,
    next: AtomicUsize,
}

impl AddressList {
    pub fn new(addresses: Vec<SocketAddr>) -> Self {
        Self {
            addresses,
            next: AtomicUsize::new(0),
        }
    }

    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// djb2 over the sticky value; stable across restarts.
pub fn sticky_hash(value: &[u8]) -> usize {
    value.iter().fold(5381usize, |hash, &b| {
        hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(b as usize)
    })
}

/// Picks addresses, skipping those the failure tracker marks as failed.
#[derive(Debug, Clone)]
pub struct Balancer {
    failures: Arc<FailureManager>,
}

impl Balancer {
    pub fn new(failures: Arc<FailureManager>) -> Self {
        Self { failures }
    }

    pub fn failures(&self) -> &Arc<FailureManager> {
        &self.failures
    }

    /// Choose an address from `list`.  With a `sticky` value the same value
    /// maps to the same node while that node stays usable; fading nodes keep
    /// their sticky sessions.  When every node is failed the first candidate
    /// is returned anyway.
    pub fn pick(&self, list: &AddressList, sticky: Option<&str>) -> Option<SocketAddr> {
        let addresses = list.addresses();
        let len = addresses.len();
        match len {
            0 => return None,
            1 => return Some(addresses[0]),
            _ => {}
        }

        match sticky {
            Some(value) => {
                let start = sticky_hash(value.as_bytes()) % len;
                (0..len)
                    .map(|i| addresses[(start + i) % len])
                    .find(|addr| self.failures.check_sticky(*addr))
                    .or(Some(addresses[start]))
            }
            None => {
                let start = list.next.fetch_add(1, Ordering::Relaxed) % len;
                (0..len)
                    .map(|i| addresses[(start + i) % len])
                    .find(|addr| self.failures.check(*addr))
                    .or(Some(addresses[start]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::FailureStatus;
    use std::time::Duration;

    fn list() -> AddressList {
        AddressList::new(vec![
            "127.0.0.1:8080".parse().unwrap(),
            "127.0.0.1:8081".parse().unwrap(),
            "127.0.0.1:8082".parse().unwrap(),
        ])
    }

    #[test]
    fn test_round_robin() {
        let lb = Balancer::new(Arc::new(FailureManager::new()));
        let list = list();
        let a = list.addresses().to_vec();

        assert_eq!(lb.pick(&list, None), Some(a[0]));
        assert_eq!(lb.pick(&list, None), Some(a[1]));
        assert_eq!(lb.pick(&list, None), Some(a[2]));
        assert_eq!(lb.pick(&list, None), Some(a[0]));
    }

    #[test]
    fn test_round_robin_skips_failed() {
        let failures = Arc::new(FailureManager::new());
        let lb = Balancer::new(failures.clone());
        let list = list();
        let a = list.addresses().to_vec();

        failures.set(a[1], FailureStatus::Connect, Some(Duration::from_secs(20)));
        for _ in 0..6 {
            assert_ne!(lb.pick(&list, None), Some(a[1]));
        }

        // fading nodes get no new sessions either
        failures.set(a[0], FailureStatus::Fade, Some(Duration::from_secs(60)));
        assert_eq!(lb.pick(&list, None), Some(a[2]));
        assert_eq!(lb.pick(&list, None), Some(a[2]));
    }

    #[test]
    fn test_all_failed_still_picks() {
        let failures = Arc::new(FailureManager::new());
        let lb = Balancer::new(failures.clone());
        let list = list();
        for addr in list.addresses() {
            failures.set(*addr, FailureStatus::Monitor, None);
        }
        assert!(lb.pick(&list, None).is_some());
        assert!(lb.pick(&AddressList::default(), None).is_none());
    }

    #[test]
    fn test_sticky_is_stable_and_fails_over() {
        let failures = Arc::new(FailureManager::new());
        let lb = Balancer::new(failures.clone());
        let list = list();

        let first = lb.pick(&list, Some("session-42")).unwrap();
        for _ in 0..5 {
            assert_eq!(lb.pick(&list, Some("session-42")), Some(first));
        }

        // fading keeps the sticky session
        failures.set(first, FailureStatus::Fade, Some(Duration::from_secs(60)));
        assert_eq!(lb.pick(&list, Some("session-42")), Some(first));

        // a real failure moves it
        failures.set(first, FailureStatus::Response, Some(Duration::from_secs(20)));
        let moved = lb.pick(&list, Some("session-42")).unwrap();
        assert_ne!(moved, first);

        failures.unset(first, FailureStatus::Ok);
        assert_eq!(lb.pick(&list, Some("session-42")), Some(first));
    }
}
