#![allow(dead_code)]

use std::sync::Arc;

use custody_chain::collector::collect_fleet;
use custody_chain::device::build_fleet;
use custody_chain::{Collector, KeyManager, Storage, VerificationEngine};

/// Storage, keys and collectors wired together the way the runner does it.
pub struct Harness {
    pub storage: Arc<Storage>,
    pub key_manager: Arc<KeyManager>,
    pub collectors: Vec<Arc<Collector>>,
}

impl Harness {
    pub fn engine(&self) -> VerificationEngine {
        VerificationEngine::new(self.storage.clone(), self.key_manager.clone()).with_workers(4)
    }

    /// Collect `events` events from each of `devices` seeded devices.
    pub async fn collect(&self, devices: usize, events: usize) -> usize {
        collect_fleet(&self.collectors, build_fleet(devices, 7), events)
            .await
            .expect("Failed to collect fleet")
    }
}

pub fn collector_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("collector-{:02}", i)).collect()
}

pub fn harness_with(storage: Storage, collectors: usize) -> Harness {
    let storage = Arc::new(storage);
    let key_manager = Arc::new(KeyManager::new());
    let collectors = collector_ids(collectors)
        .into_iter()
        .map(|id| Arc::new(Collector::new(id, key_manager.clone(), storage.clone())))
        .collect();

    Harness {
        storage,
        key_manager,
        collectors,
    }
}

/// In-memory evidence store with `collectors` collectors sharing one key manager.
pub async fn setup_harness(collectors: usize) -> Harness {
    let storage = Storage::new_in_memory()
        .await
        .expect("Failed to create test storage");
    harness_with(storage, collectors)
}
