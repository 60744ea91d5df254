//! State shared between the sampling loop and the exporter.
//!
//! The sampler is the only writer. Snapshots are published by replacing an
//! `Arc`, so a reader always sees a complete snapshot and never blocks the
//! writer. The store sits behind a mutex held only for one update or query.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};

use crate::storage::{Snapshot, Store};

pub struct Shared {
    latest: ArcSwapOption<Snapshot>,
    store: Mutex<Store>,
}

impl Shared {
    pub fn new(store: Store) -> Self {
        Self {
            latest: ArcSwapOption::empty(),
            store: Mutex::new(store),
        }
    }

    /// Replaces the latest snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        self.latest.store(Some(Arc::new(snapshot)));
    }

    /// Latest published snapshot, if any poll has succeeded yet.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.load_full()
    }

    pub fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock()
    }
}
