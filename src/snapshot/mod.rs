use std::sync::Arc;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

/// Holder of the currently installed read view of one index.
///
/// Readers clone the inner `Arc` while holding the shared side of the
/// global lock; the merger replaces it under the exclusive side. Old
/// storage stays alive for as long as any snapshot still references it.
pub struct ViewSlot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> ViewSlot<T> {
    pub fn new(initial: T) -> Self {
        ViewSlot { current: RwLock::new(Arc::new(initial)) }
    }

    /// Reference-counted handle to the installed view.
    pub fn load(&self) -> Arc<T> {
        self.current.read().clone()
    }

    /// Swap in a new view. Only called while the global lock is held
    /// exclusively, so no reader observes a half-swapped set of views.
    pub fn install(&self, next: Arc<T>) {
        *self.current.write() = next;
    }
}

/// Shared guard held by a reader for the whole duration of one query.
/// Dropping it releases the shared side of the global lock.
pub struct ReaderGuard {
    _guard: ArcRwLockReadGuard<RawRwLock, ()>,
}

/// Exclusive guard held by the merger only across the pointer-swap window.
pub struct SwapGuard {
    _guard: ArcRwLockWriteGuard<RawRwLock, ()>,
}

/// The global reader/writer lock coordinating snapshot capture against
/// read-view swaps. Readers take the shared side; this only contends
/// during the swap window.
pub struct SnapshotManager {
    lock: Arc<RwLock<()>>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        SnapshotManager { lock: Arc::new(RwLock::new(())) }
    }

    pub fn reader_guard(&self) -> ReaderGuard {
        ReaderGuard { _guard: RwLock::read_arc(&self.lock) }
    }

    pub fn swap_guard(&self) -> SwapGuard {
        SwapGuard { _guard: RwLock::write_arc(&self.lock) }
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_keep_their_view_across_installs() {
        let slot = ViewSlot::new(vec![1, 2, 3]);
        let before = slot.load();
        slot.install(Arc::new(vec![4]));
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*slot.load(), vec![4]);
    }

    #[test]
    fn swap_waits_for_readers() {
        let manager = Arc::new(SnapshotManager::new());
        let reader = manager.reader_guard();

        let m2 = manager.clone();
        let swapper = thread::spawn(move || {
            let _swap = m2.swap_guard();
        });

        // The swap cannot complete until the reader guard drops.
        thread::sleep(std::time::Duration::from_millis(20));
        assert!(!swapper.is_finished());
        drop(reader);
        swapper.join().unwrap();
    }
}
