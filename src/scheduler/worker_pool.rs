use std::sync::Arc;

use dashmap::DashMap;

use crate::scheduler::traits::EngineWorker;

/// Workers registered for one function, plus the subset currently asleep.
pub struct WorkerPool {
    function_name: String,
    connected: DashMap<u64, Arc<dyn EngineWorker>>,
    sleeping: DashMap<u64, Arc<dyn EngineWorker>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("function_name", &self.function_name)
            .field("connected", &self.connected.len())
            .field("sleeping", &self.sleeping.len())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(function_name: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            connected: DashMap::new(),
            sleeping: DashMap::new(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn add_worker(&self, worker: Arc<dyn EngineWorker>) {
        self.connected.insert(worker.id(), worker);
    }

    /// Drops the worker from both sets. Returns true if it was connected.
    pub fn remove_worker(&self, worker_id: u64) -> bool {
        self.sleeping.remove(&worker_id);
        self.connected.remove(&worker_id).is_some()
    }

    pub fn mark_sleeping(&self, worker: Arc<dyn EngineWorker>) {
        self.sleeping.insert(worker.id(), worker);
    }

    pub fn mark_awake(&self, worker_id: u64) {
        self.sleeping.remove(&worker_id);
    }

    /// Wakes every sleeping worker and returns how many were nudged.
    /// Workers stay in the sleeping set until they ask for work.
    pub fn wakeup_workers(&self) -> usize {
        let sleepers: Vec<Arc<dyn EngineWorker>> =
            self.sleeping.iter().map(|e| e.value().clone()).collect();
        for worker in &sleepers {
            worker.wake_up();
        }
        sleepers.len()
    }

    pub fn contains(&self, worker_id: u64) -> bool {
        self.connected.contains_key(&worker_id)
    }

    pub fn is_sleeping(&self, worker_id: u64) -> bool {
        self.sleeping.contains_key(&worker_id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn sleeping_count(&self) -> usize {
        self.sleeping.len()
    }
}
