// ── Connected device registry ──
//
// Concurrent set of live datapaths with push-based change notification.
// Connect/disconnect events mutate it; the poller reads a snapshot once
// per cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::debug;

use crate::model::DatapathId;

/// Tracks which switches are currently connected.
///
/// Uses `DashMap` for concurrent mutation and a `watch` channel carrying
/// a sorted snapshot, rebuilt on every membership change.
pub struct DeviceRegistry {
    /// Datapath -> time the connection was registered.
    devices: DashMap<DatapathId, DateTime<Utc>>,

    /// Sorted snapshot, rebuilt on mutation for cheap reads by the poller.
    snapshot: watch::Sender<Arc<Vec<DatapathId>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            devices: DashMap::new(),
            snapshot,
        }
    }

    /// Register a datapath. Returns `true` if it was not already connected.
    pub fn on_connect(&self, id: DatapathId) -> bool {
        // The watch lock is held across the map change and the rebuild, so
        // the published snapshot always matches the device set.
        self.snapshot.send_if_modified(|snap| {
            let is_new = match self.devices.entry(id) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(Utc::now());
                    true
                }
            };
            if is_new {
                debug!(datapath = %id, "register datapath");
                *snap = self.sorted_ids();
            }
            is_new
        })
    }

    /// Forget a datapath. Returns `true` if it was registered.
    pub fn on_disconnect(&self, id: DatapathId) -> bool {
        self.snapshot.send_if_modified(|snap| {
            let removed = self.devices.remove(&id).is_some();
            if removed {
                debug!(datapath = %id, "unregister datapath");
                *snap = self.sorted_ids();
            }
            removed
        })
    }

    /// Current set of connected datapaths, ascending (cheap `Arc` clone).
    pub fn list_connected(&self) -> Arc<Vec<DatapathId>> {
        self.snapshot.borrow().clone()
    }

    pub fn connected_since(&self, id: DatapathId) -> Option<DateTime<Utc>> {
        self.devices.get(&id).map(|r| *r.value())
    }

    pub fn contains(&self, id: DatapathId) -> bool {
        self.devices.contains_key(&id)
    }

    /// Subscribe to membership changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<DatapathId>>> {
        self.snapshot.subscribe()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn sorted_ids(&self) -> Arc<Vec<DatapathId>> {
        let mut ids: Vec<DatapathId> = self.devices.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        Arc::new(ids)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    fn dp(raw: u64) -> DatapathId {
        DatapathId::new(raw)
    }

    #[test]
    fn connect_returns_true_for_new_device() {
        let reg = DeviceRegistry::new();
        assert!(reg.on_connect(dp(1)));
        assert!(reg.contains(dp(1)));
    }

    #[test]
    fn connect_is_idempotent() {
        let reg = DeviceRegistry::new();
        reg.on_connect(dp(1));
        let since = reg.connected_since(dp(1));
        assert!(!reg.on_connect(dp(1)));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.connected_since(dp(1)), since);
    }

    #[test]
    fn disconnect_unknown_device_is_noop() {
        let reg = DeviceRegistry::new();
        reg.on_connect(dp(1));
        assert!(!reg.on_disconnect(dp(7)));
        assert_eq!(*reg.list_connected(), vec![dp(1)]);
    }

    #[test]
    fn connect_then_disconnect_leaves_registry_empty() {
        let reg = DeviceRegistry::new();
        reg.on_connect(dp(1));
        assert!(reg.on_disconnect(dp(1)));
        assert!(reg.is_empty());
        assert!(reg.list_connected().is_empty());
    }

    #[test]
    fn snapshot_is_sorted() {
        let reg = DeviceRegistry::new();
        reg.on_connect(dp(3));
        reg.on_connect(dp(1));
        reg.on_connect(dp(2));
        assert_eq!(*reg.list_connected(), vec![dp(1), dp(2), dp(3)]);
    }

    #[test]
    fn subscribers_see_membership_changes() {
        let reg = DeviceRegistry::new();
        let mut rx = reg.subscribe();
        reg.on_connect(dp(5));
        assert!(rx.has_changed().unwrap_or(false));
        assert_eq!(**rx.borrow_and_update(), vec![dp(5)]);

        // A repeated connect does not notify.
        reg.on_connect(dp(5));
        assert!(!rx.has_changed().unwrap_or(true));
    }

    #[test]
    fn concurrent_membership_changes_keep_snapshot_consistent() {
        for round in 0..500 {
            let reg = Arc::new(DeviceRegistry::new());
            reg.on_connect(dp(1));
            let barrier = Arc::new(Barrier::new(2));

            let leaver = {
                let (reg, barrier) = (Arc::clone(&reg), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    reg.on_disconnect(dp(1));
                })
            };
            let joiner = {
                let (reg, barrier) = (Arc::clone(&reg), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    reg.on_connect(dp(2));
                })
            };
            leaver.join().unwrap();
            joiner.join().unwrap();

            let mut actual: Vec<DatapathId> = reg.devices.iter().map(|r| *r.key()).collect();
            actual.sort_unstable();
            assert_eq!(*reg.list_connected(), actual, "round {round}");
            assert_eq!(actual, vec![dp(2)]);
        }
    }
}
