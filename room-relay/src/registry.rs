//! In-memory room registry backing the directory service.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::message::RoomEntry;

/// Thread-safe map of room name to hosting details.
///
/// Every operation holds the inner lock for exactly one map access. A
/// poisoned lock is recovered since no writer can leave the map half-updated.
///
/// Entries never expire. A host that dies without unregistering stays listed
/// until its name is reused or explicitly removed.
#[derive(Debug, Default)]
pub struct Registry {
    rooms: Mutex<BTreeMap<String, RoomEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a room, replacing any earlier record under the same name.
    pub fn register(
        &self,
        name: impl Into<String>,
        host_ip: impl Into<String>,
        host_port: u16,
        password: Option<String>,
    ) {
        let entry = RoomEntry {
            host_ip: host_ip.into(),
            host_port,
            password,
        };
        self.lock().insert(name.into(), entry);
    }

    /// Removes a room. Unknown names are ignored.
    pub fn unregister(&self, name: &str) -> Option<RoomEntry> {
        self.lock().remove(name)
    }

    /// Copies the full mapping so callers never iterate the live map.
    pub fn snapshot(&self) -> BTreeMap<String, RoomEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, RoomEntry>> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
