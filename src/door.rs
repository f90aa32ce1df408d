//! Per-entity reader/writer locks ("doors").
//!
//! A door is created the first time its `(collection, key)` is requested and
//! lives as long as the registry. Mutations of a thread hold the write side
//! for the whole build-and-apply span; reads hold the read side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Which family of entities a door guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// The thread file (and its drafts) for a thread id.
    Thread,
    /// The forward-batch list of a thread id.
    Forward,
}

/// State protected by a door.
#[derive(Debug, Default)]
pub struct DoorState {
    /// The id was retired by draft promotion; readers must not open it.
    pub renamed: bool,
}

/// A reader/writer lock for one entity.
#[derive(Debug, Default)]
pub struct Door {
    state: RwLock<DoorState>,
}

impl Door {
    /// Shared access. Readers run concurrently with each other.
    pub fn read(&self) -> RwLockReadGuard<'_, DoorState> {
        // Poisoning is ignored: the state is one flag.
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access.
    pub fn write(&self) -> RwLockWriteGuard<'_, DoorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lazily populated table of doors, never evicted.
#[derive(Debug, Default)]
pub struct DoorRegistry {
    doors: Mutex<HashMap<(Collection, String), Arc<Door>>>,
}

impl DoorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the door for `(collection, key)`, creating it on first use.
    pub fn acquire(&self, collection: Collection, key: &str) -> Arc<Door> {
        let mut doors = self.doors.lock().unwrap_or_else(PoisonError::into_inner);
        doors
            .entry((collection, key.to_owned()))
            .or_default()
            .clone()
    }

    /// Number of doors created so far.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.doors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_key_shares_door() {
        let reg = DoorRegistry::new();
        let a = reg.acquire(Collection::Thread, "T1");
        let b = reg.acquire(Collection::Thread, "T1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_collections_are_independent() {
        let reg = DoorRegistry::new();
        let thread = reg.acquire(Collection::Thread, "T1");
        let forward = reg.acquire(Collection::Forward, "T1");
        assert!(!Arc::ptr_eq(&thread, &forward));

        // Holding one does not block the other.
        let _w = thread.write();
        let _f = forward.write();
    }

    #[test]
    fn test_renamed_flag_visible_to_readers() {
        let reg = DoorRegistry::new();
        reg.acquire(Collection::Thread, "_1700000000000").write().renamed = true;
        assert!(reg.acquire(Collection::Thread, "_1700000000000").read().renamed);
    }

    #[test]
    fn test_writers_are_serialized() {
        let reg = Arc::new(DoorRegistry::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let door = reg.acquire(Collection::Thread, "T1");
                        let _guard = door.write();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 1);
    }
}
