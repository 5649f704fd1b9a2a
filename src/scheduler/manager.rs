use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{GearmanError, Result};
use crate::metrics::{EngineMetrics, MetricsSnapshot, QueueSnapshot};
use crate::persistence::{
    ExceptionStore, MemoryExceptionStore, NoopPersistenceEngine, PersistenceEngine,
};
use crate::scheduler::handle::JobHandleFactory;
use crate::scheduler::job::{now_epoch, Job, JobAction, JobKey, JobPriority, JobState, JobStatus};
use crate::scheduler::lock::KeyedLock;
use crate::scheduler::queue::{PriorityJobQueue, QueuedJob};
use crate::scheduler::traits::{EngineClient, EngineWorker};
use crate::scheduler::worker_pool::WorkerPool;

/// Worker <-> job pairing. Both directions change together under one lock.
#[derive(Debug, Default)]
struct Assignments {
    by_worker: HashMap<u64, String>,
    by_job: HashMap<String, u64>,
}

impl Assignments {
    fn pair(&mut self, worker_id: u64, job_handle: &str) {
        if let Some(previous) = self.by_worker.insert(worker_id, job_handle.to_string()) {
            self.by_job.remove(&previous);
        }
        if let Some(previous) = self.by_job.insert(job_handle.to_string(), worker_id) {
            if previous != worker_id {
                self.by_worker.remove(&previous);
            }
        }
    }

    fn unpair_worker(&mut self, worker_id: u64) -> Option<String> {
        let handle = self.by_worker.remove(&worker_id)?;
        self.by_job.remove(&handle);
        Some(handle)
    }

    fn unpair_job(&mut self, job_handle: &str) -> Option<u64> {
        let worker_id = self.by_job.remove(job_handle)?;
        self.by_worker.remove(&worker_id);
        Some(worker_id)
    }
}

/// How a finished job reports back to its clients.
#[derive(Clone, Copy)]
enum Outcome<'a> {
    Complete(&'a [u8]),
    Fail,
    Exception(&'a [u8]),
}

type ClientSet = HashMap<u64, Arc<dyn EngineClient>>;

/// Shared scheduling state for every connection.
///
/// Queues and pools are created lazily per function name. Everything that
/// touches one job (submission, assignment, re-enqueue, completion, client
/// detach) runs under the submission stripe for its unique ID, so those steps
/// never interleave for the same job while unrelated jobs proceed in parallel.
/// Peer callbacks never block: adapters only push onto outbound channels.
pub struct JobManager {
    queues: DashMap<String, Arc<PriorityJobQueue>>,
    pools: DashMap<String, Arc<WorkerPool>>,
    /// Queued and working jobs by handle.
    jobs: DashMap<String, Job>,
    handles_by_key: DashMap<JobKey, String>,
    clients_by_key: DashMap<JobKey, ClientSet>,
    workers: DashMap<u64, Arc<dyn EngineWorker>>,
    assignments: Mutex<Assignments>,
    submission_lock: KeyedLock,
    registry_lock: KeyedLock,
    handles: JobHandleFactory,
    persistence: Arc<dyn PersistenceEngine>,
    exceptions: Arc<dyn ExceptionStore>,
    metrics: EngineMetrics,
    max_queue_size: Option<usize>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("hostname", &self.handles.hostname())
            .field("queues", &self.queues.len())
            .field("jobs", &self.jobs.len())
            .field("workers", &self.workers.len())
            .field("persistence", &self.persistence.identifier())
            .finish()
    }
}

impl JobManager {
    pub fn new(
        config: &EngineConfig,
        persistence: Arc<dyn PersistenceEngine>,
        exceptions: Arc<dyn ExceptionStore>,
    ) -> Self {
        Self {
            queues: DashMap::new(),
            pools: DashMap::new(),
            jobs: DashMap::new(),
            handles_by_key: DashMap::new(),
            clients_by_key: DashMap::new(),
            workers: DashMap::new(),
            assignments: Mutex::new(Assignments::default()),
            submission_lock: KeyedLock::new(config.lock_stripes),
            registry_lock: KeyedLock::new(config.lock_stripes),
            handles: JobHandleFactory::new(config.hostname.clone()),
            persistence,
            exceptions,
            metrics: EngineMetrics::new(),
            max_queue_size: config.max_queue_size,
        }
    }

    /// Manager with no durable store and a default-sized exception ring.
    pub fn in_memory(hostname: impl Into<String>) -> Self {
        let config = EngineConfig {
            hostname: hostname.into(),
            ..Default::default()
        };
        Self::new(
            &config,
            Arc::new(NoopPersistenceEngine),
            Arc::new(MemoryExceptionStore::new(config.exception_store_capacity)),
        )
    }

    pub fn exceptions(&self) -> &Arc<dyn ExceptionStore> {
        &self.exceptions
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceEngine> {
        &self.persistence
    }

    /// Queue for `function`, created on first use.
    pub fn job_queue(&self, function: &str) -> Arc<PriorityJobQueue> {
        if let Some(queue) = self.queues.get(function) {
            return queue.value().clone();
        }
        let _guard = self.registry_lock.lock(function);
        self.queues
            .entry(function.to_string())
            .or_insert_with(|| {
                tracing::debug!(function, "Created job queue");
                Arc::new(PriorityJobQueue::with_capacity(function, self.max_queue_size))
            })
            .value()
            .clone()
    }

    /// Pool for `function`, created on first use.
    pub fn worker_pool(&self, function: &str) -> Arc<WorkerPool> {
        if let Some(pool) = self.pools.get(function) {
            return pool.value().clone();
        }
        let _guard = self.registry_lock.lock(function);
        self.pools
            .entry(function.to_string())
            .or_insert_with(|| Arc::new(WorkerPool::new(function)))
            .value()
            .clone()
    }

    pub fn queue(&self, function: &str) -> Option<Arc<PriorityJobQueue>> {
        self.queues.get(function).map(|q| q.value().clone())
    }

    pub fn pool(&self, function: &str) -> Option<Arc<WorkerPool>> {
        self.pools.get(function).map(|p| p.value().clone())
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Connected workers with their abilities, ordered by id.
    pub fn workers(&self) -> Vec<(u64, Vec<String>)> {
        let mut workers: Vec<(u64, Vec<String>)> = self
            .workers
            .iter()
            .map(|e| (*e.key(), e.value().abilities()))
            .collect();
        workers.sort_by_key(|(id, _)| *id);
        workers
    }

    /// Store a job, or return the live job that already holds its
    /// function and unique ID.
    pub fn store_job(&self, job: Job) -> Result<Job> {
        self.store(job, None)
    }

    /// Like [`store_job`](Self::store_job), and registers `client` for the
    /// job's results unless the job runs in the background.
    pub fn store_job_for_client(&self, job: Job, client: Arc<dyn EngineClient>) -> Result<Job> {
        self.store(job, Some(client))
    }

    fn store(&self, mut job: Job, client: Option<Arc<dyn EngineClient>>) -> Result<Job> {
        let queue = self.job_queue(&job.function_name);
        if job.unique_id.is_empty() {
            job.unique_id = self.generate_unique_id(&job.function_name);
        }
        let key = job.key();

        let stored = {
            let _guard = self.submission_lock.lock(&key.unique_id);

            let existing = match self.live_job(&key) {
                Some(existing) => Some(existing),
                None if queue.unique_id_in_use(&key.unique_id) => {
                    let adopted = self.adopt_persisted(&key);
                    if adopted.is_none() {
                        tracing::error!(
                            function = %key.function_name,
                            unique_id = %key.unique_id,
                            "Queued unique id has no job record; dropping stale entry"
                        );
                        queue.remove(&key.unique_id);
                    }
                    adopted
                }
                None => None,
            };

            if let Some(existing) = existing {
                if !existing.background {
                    if let Some(client) = &client {
                        self.attach_client(&key, client);
                    }
                }
                tracing::debug!(
                    handle = %existing.job_handle,
                    function = %key.function_name,
                    unique_id = %key.unique_id,
                    "Coalesced submission onto live job"
                );
                return Ok(existing);
            }

            if job.job_handle.is_empty() {
                job.job_handle = self.handles.next_handle();
            }

            if !queue.enqueue(QueuedJob::from(&job))? {
                tracing::warn!(
                    function = %key.function_name,
                    unique_id = %key.unique_id,
                    "Unique id already queued without a tracked job; tracking new submission"
                );
            }

            self.jobs.insert(job.job_handle.clone(), job.clone());
            self.handles_by_key
                .insert(key.clone(), job.job_handle.clone());
            if !job.background {
                if let Some(client) = &client {
                    self.attach_client(&key, client);
                }
            }

            if let Err(e) = self.persistence.write(&job) {
                tracing::warn!(
                    handle = %job.job_handle,
                    engine = self.persistence.identifier(),
                    error = %e,
                    "Failed to persist job"
                );
            }

            self.metrics.record_enqueued();
            tracing::debug!(
                handle = %job.job_handle,
                function = %job.function_name,
                priority = %job.priority,
                background = job.background,
                "Job enqueued"
            );
            job
        };

        if stored.is_ready() {
            self.worker_pool(&stored.function_name).wakeup_workers();
        }
        Ok(stored)
    }

    /// Random unique ID not currently used by a queued or live job.
    pub fn generate_unique_id(&self, function: &str) -> String {
        let queue = self.job_queue(function);
        loop {
            let candidate = Uuid::new_v4().to_string();
            if !queue.unique_id_in_use(&candidate)
                && !self
                    .handles_by_key
                    .contains_key(&JobKey::new(function, candidate.as_str()))
            {
                return candidate;
            }
        }
    }

    fn live_job(&self, key: &JobKey) -> Option<Job> {
        let handle = self.handles_by_key.get(key)?.value().clone();
        self.jobs.get(&handle).map(|j| j.value().clone())
    }

    /// Load a queued job's record from persistence into the job table.
    /// Caller holds the submission stripe for the key.
    fn adopt_persisted(&self, key: &JobKey) -> Option<Job> {
        let mut job = match self.persistence.find_job(&key.function_name, &key.unique_id) {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(
                    function = %key.function_name,
                    unique_id = %key.unique_id,
                    error = %e,
                    "Failed to load persisted job"
                );
                return None;
            }
        };

        if let Err(e) = job.requeue() {
            tracing::error!(
                function = %key.function_name,
                unique_id = %key.unique_id,
                error = %e,
                "Persisted job is not runnable"
            );
            return None;
        }
        // Handles from an earlier process can collide with this factory's.
        job.job_handle = self.handles.next_handle();

        self.jobs.insert(job.job_handle.clone(), job.clone());
        self.handles_by_key.insert(key.clone(), job.job_handle.clone());
        Some(job)
    }

    fn attach_client(&self, key: &JobKey, client: &Arc<dyn EngineClient>) {
        self.clients_by_key
            .entry(key.clone())
            .or_default()
            .insert(client.id(), client.clone());
        client.set_current_job(Some(key.clone()));
    }

    fn clients_for(&self, key: &JobKey) -> Vec<Arc<dyn EngineClient>> {
        self.clients_by_key
            .get(key)
            .map(|clients| clients.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of clients waiting on the job with this key.
    pub fn client_count(&self, key: &JobKey) -> usize {
        self.clients_by_key.get(key).map(|c| c.len()).unwrap_or(0)
    }

    /// Hand the worker its next job, checking abilities in registration order.
    pub fn next_job_for_worker(&self, worker: &dyn EngineWorker) -> Option<Job> {
        let now = now_epoch();
        let abilities = worker.abilities();
        for function in &abilities {
            if let Some(pool) = self.pool(function) {
                pool.mark_awake(worker.id());
            }
        }

        for function in abilities {
            let Some(queue) = self.queue(&function) else {
                continue;
            };

            while let Some(entry) = queue.poll_at(now) {
                let key = entry.key();
                let claimed = {
                    let _guard = self.submission_lock.lock(&key.unique_id);
                    self.claim_for_worker(&key, worker.id())
                };

                match claimed {
                    Some(job) => {
                        tracing::debug!(
                            handle = %job.job_handle,
                            function = %function,
                            worker_id = worker.id(),
                            "Job assigned"
                        );
                        return Some(job);
                    }
                    None => {
                        tracing::error!(
                            function = %function,
                            unique_id = %key.unique_id,
                            "Queue entry has no backing job record; skipping"
                        );
                    }
                }
            }
        }
        None
    }

    fn claim_for_worker(&self, key: &JobKey, worker_id: u64) -> Option<Job> {
        let tracked = self.handles_by_key.get(key).map(|h| h.value().clone());
        let handle = match tracked {
            Some(handle) => handle,
            None => self.adopt_persisted(key)?.job_handle,
        };

        let job = {
            let mut live = self.jobs.get_mut(&handle)?;
            if let Err(e) = live.mark_working() {
                tracing::error!(handle = %handle, error = %e, "Cannot start job");
                return None;
            }
            live.value().clone()
        };

        self.assignments.lock().pair(worker_id, &handle);
        Some(job)
    }

    pub fn current_job_for_worker(&self, worker_id: u64) -> Option<Job> {
        let handle = self.assignments.lock().by_worker.get(&worker_id).cloned()?;
        self.job_by_handle(&handle)
    }

    pub fn worker_for_job(&self, job_handle: &str) -> Option<u64> {
        self.assignments.lock().by_job.get(job_handle).copied()
    }

    pub fn job_by_handle(&self, job_handle: &str) -> Option<Job> {
        self.jobs.get(job_handle).map(|j| j.value().clone())
    }

    pub fn handle_work_completion(&self, job: &Job, data: &[u8]) {
        if self.finish_job(job, Outcome::Complete(data)) {
            self.metrics.record_completed();
        }
    }

    pub fn handle_work_failure(&self, job: &Job) {
        if self.finish_job(job, Outcome::Fail) {
            self.metrics.record_failed();
        }
    }

    pub fn handle_work_exception(&self, job: &Job, exception: &[u8]) {
        if self.finish_job(job, Outcome::Exception(exception)) {
            self.metrics.record_exception();
        }
    }

    pub fn handle_work_data(&self, job: &Job, data: &[u8]) {
        if job.background {
            return;
        }
        for client in self.clients_for(&job.key()) {
            if let Err(e) = client.send_work_data(&job.job_handle, data) {
                tracing::warn!(client_id = client.id(), handle = %job.job_handle, error = %e, "Failed to forward WORK_DATA");
            }
        }
    }

    pub fn handle_work_warning(&self, job: &Job, data: &[u8]) {
        if job.background {
            return;
        }
        for client in self.clients_for(&job.key()) {
            if let Err(e) = client.send_work_warning(&job.job_handle, data) {
                tracing::warn!(client_id = client.id(), handle = %job.job_handle, error = %e, "Failed to forward WORK_WARNING");
            }
        }
    }

    /// Record progress and tell waiting clients. Unknown handles are ignored.
    pub fn update_job_status(&self, job_handle: &str, numerator: u32, denominator: u32) {
        let (key, background, status) = {
            let Some(mut job) = self.jobs.get_mut(job_handle) else {
                tracing::debug!(handle = %job_handle, "Status update for untracked job");
                return;
            };
            if !job.set_progress(numerator, denominator) {
                return;
            }
            (job.value().key(), job.background, job.status())
        };

        if background {
            return;
        }
        for client in self.clients_for(&key) {
            if let Err(e) = client.send_work_status(&status) {
                tracing::warn!(client_id = client.id(), handle = %job_handle, error = %e, "Failed to forward WORK_STATUS");
            }
        }
    }

    pub fn check_job_status(&self, job_handle: &str) -> JobStatus {
        self.jobs
            .get(job_handle)
            .map(|j| j.status())
            .unwrap_or_else(|| JobStatus::unknown(job_handle))
    }

    /// Notify clients, then forget the job everywhere. Returns false if the
    /// job was already finished.
    fn finish_job(&self, job: &Job, outcome: Outcome<'_>) -> bool {
        let key = job.key();
        let handle = job.job_handle.as_str();
        let _guard = self.submission_lock.lock(&key.unique_id);

        let Some(live) = self.job_by_handle(handle) else {
            tracing::debug!(handle = %handle, "Job already finished");
            return false;
        };

        if let Outcome::Exception(exception) = outcome {
            self.exceptions.store_exception(
                handle,
                &live.unique_id,
                live.data.clone(),
                Bytes::copy_from_slice(exception),
            );
        }

        if !live.background {
            for client in self.clients_for(&key) {
                let sent = match outcome {
                    Outcome::Complete(data) => client.send_work_results(handle, data),
                    Outcome::Fail => client.send_work_fail(handle),
                    Outcome::Exception(data) => client.send_work_exception(handle, data),
                };
                if let Err(e) = sent {
                    tracing::warn!(client_id = client.id(), handle = %handle, error = %e, "Failed to deliver job outcome");
                }
            }
        }

        self.discard(&key, handle);
        tracing::debug!(handle = %handle, function = %key.function_name, "Job finished");
        true
    }

    /// Remove every trace of a job. Caller holds the submission stripe.
    fn discard(&self, key: &JobKey, job_handle: &str) {
        if let Some((_, mut job)) = self.jobs.remove(job_handle) {
            job.complete();
        }
        self.handles_by_key.remove_if(key, |_, h| h == job_handle);
        self.clients_by_key.remove(key);
        self.assignments.lock().unpair_job(job_handle);
        if let Some(queue) = self.queue(&key.function_name) {
            queue.remove(&key.unique_id);
        }
        if let Err(e) = self.persistence.delete(&key.function_name, &key.unique_id) {
            tracing::warn!(
                handle = %job_handle,
                engine = self.persistence.identifier(),
                error = %e,
                "Failed to delete persisted job"
            );
        }
    }

    /// Decide what happens to `job` when its worker goes away.
    pub fn disconnect_worker(&self, job: &Job) -> JobAction {
        match job.state() {
            JobState::Working => {
                if job.background || self.client_count(&job.key()) > 0 {
                    JobAction::Reenqueue
                } else {
                    JobAction::MarkComplete
                }
            }
            JobState::Queued => {
                tracing::error!(handle = %job.job_handle, "Worker disconnected from a queued job");
                JobAction::DoNothing
            }
            JobState::Complete | JobState::Unknown => JobAction::DoNothing,
        }
    }

    /// Put a working job back on its queue at its original priority.
    /// A queued job is left alone; a finished job is an error.
    pub fn re_enqueue_job(&self, job: &Job) -> Result<()> {
        let key = job.key();
        let ready = {
            let _guard = self.submission_lock.lock(&key.unique_id);
            self.requeue_locked(job)?
        };

        if ready {
            self.worker_pool(&job.function_name).wakeup_workers();
        }
        Ok(())
    }

    /// Move a working job back onto its queue. Returns true if the job was
    /// requeued and can run now. Caller holds the submission stripe.
    fn requeue_locked(&self, job: &Job) -> Result<bool> {
        let entry = {
            let Some(mut live) = self.jobs.get_mut(&job.job_handle) else {
                return Err(GearmanError::IllegalStateTransition {
                    from: JobState::Complete,
                    to: JobState::Queued,
                });
            };
            if !live.requeue()? {
                return Ok(false);
            }
            QueuedJob::from(&*live)
        };

        self.assignments.lock().unpair_job(&job.job_handle);
        self.job_queue(&job.function_name).restore(entry);
        self.metrics.record_reenqueued();
        tracing::debug!(handle = %job.job_handle, function = %job.function_name, "Job re-enqueued");
        Ok(job.is_ready())
    }

    /// Remove a departed worker from every pool and settle its in-flight job.
    pub fn unregister_worker(&self, worker: &dyn EngineWorker) {
        let worker_id = worker.id();
        for pool in self.pools.iter() {
            pool.value().remove_worker(worker_id);
        }
        self.workers.remove(&worker_id);

        let handle = self.assignments.lock().by_worker.get(&worker_id).cloned();
        if let Some(handle) = handle {
            self.settle_orphaned_job(&handle);
            self.assignments.lock().unpair_worker(worker_id);
        }

        tracing::info!(worker_id, "Worker unregistered");
    }

    /// Apply the disconnect disposition to a job whose worker left. The
    /// client count is read and acted on under the job's submission stripe,
    /// so a client coalescing onto the job either lands before the decision
    /// or finds the job gone and submits afresh.
    fn settle_orphaned_job(&self, job_handle: &str) {
        let Some(key) = self.jobs.get(job_handle).map(|j| j.value().key()) else {
            return;
        };

        let wake = {
            let _guard = self.submission_lock.lock(&key.unique_id);
            let Some(job) = self.job_by_handle(job_handle) else {
                return;
            };
            match self.disconnect_worker(&job) {
                JobAction::Reenqueue => match self.requeue_locked(&job) {
                    Ok(ready) => ready,
                    Err(e) => {
                        tracing::error!(handle = %job_handle, error = %e, "Failed to re-enqueue job");
                        false
                    }
                },
                JobAction::MarkComplete => {
                    self.discard(&key, job_handle);
                    self.metrics.record_dropped();
                    tracing::debug!(handle = %job_handle, "Dropped job with no waiting clients");
                    false
                }
                JobAction::DoNothing => false,
            }
        };

        if wake {
            self.worker_pool(&key.function_name).wakeup_workers();
        }
    }

    /// Detach a departed client from the job it last submitted. The job
    /// itself stays queued even if no other client is waiting.
    pub fn unregister_client(&self, client: &dyn EngineClient) {
        let Some(key) = client.current_job() else {
            return;
        };
        let _guard = self.submission_lock.lock(&key.unique_id);
        if let Some(mut clients) = self.clients_by_key.get_mut(&key) {
            clients.remove(&client.id());
        }
        self.clients_by_key.remove_if(&key, |_, clients| clients.is_empty());
        tracing::debug!(client_id = client.id(), job = %key, "Client unregistered");
    }

    pub fn register_worker_ability(&self, function: &str, worker: &Arc<dyn EngineWorker>) {
        self.workers.insert(worker.id(), worker.clone());
        self.job_queue(function);
        self.worker_pool(function).add_worker(worker.clone());
        tracing::debug!(worker_id = worker.id(), function, "Worker registered ability");
    }

    pub fn unregister_worker_ability(&self, function: &str, worker_id: u64) {
        if let Some(pool) = self.pool(function) {
            pool.remove_worker(worker_id);
        }
    }

    pub fn reset_worker_abilities(&self, worker_id: u64) {
        for pool in self.pools.iter() {
            pool.value().remove_worker(worker_id);
        }
    }

    /// Park the worker in each of its pools. If any of those queues already
    /// holds a runnable job, wake it straight back up.
    pub fn mark_worker_asleep(&self, worker: &Arc<dyn EngineWorker>) {
        // Flag first: a submission that lands after this point either sees
        // the worker in a pool or is seen by the queue check below.
        worker.mark_asleep();

        let now = now_epoch();
        let mut work_waiting = false;
        for function in worker.abilities() {
            self.worker_pool(&function).mark_sleeping(worker.clone());
            if let Some(queue) = self.queue(&function) {
                work_waiting |= queue.has_ready_job(now);
            }
        }

        if work_waiting {
            worker.wake_up();
        }
    }

    /// Rebuild queues from the persistence engine's descriptors.
    pub fn restore_from_persistence(&self) -> Result<usize> {
        let descriptors = self.persistence.read_all()?;
        let mut restored = 0;
        for entry in descriptors {
            let queue = self.job_queue(&entry.function_name);
            let _guard = self.submission_lock.lock(&entry.unique_id);
            if queue.restore(entry) {
                restored += 1;
            }
        }
        tracing::info!(
            engine = self.persistence.identifier(),
            restored,
            "Restored queued jobs"
        );
        Ok(restored)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut running: HashMap<String, usize> = HashMap::new();
        for job in self.jobs.iter() {
            if job.is_running() {
                *running.entry(job.function_name.clone()).or_insert(0) += 1;
            }
        }

        let queues: Vec<QueueSnapshot> = self
            .queue_names()
            .into_iter()
            .filter_map(|function| {
                let queue = self.queue(&function)?;
                Some(QueueSnapshot {
                    total: queue.size(),
                    high: queue.size_of(JobPriority::High),
                    normal: queue.size_of(JobPriority::Normal),
                    low: queue.size_of(JobPriority::Low),
                    running: running.get(&function).copied().unwrap_or(0),
                    available_workers: self.pool(&function).map(|p| p.connected_count()).unwrap_or(0),
                    function,
                })
            })
            .collect();

        MetricsSnapshot {
            counters: self.metrics.counters(),
            pending: queues.iter().map(|q| q.total).sum(),
            active: running.values().sum(),
            workers: self.worker_count(),
            queues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_stay_paired() {
        let mut a = Assignments::default();
        a.pair(1, "h:1");
        a.pair(1, "h:2");
        assert!(!a.by_job.contains_key("h:1"));
        assert_eq!(a.by_job.get("h:2"), Some(&1));

        a.pair(2, "h:2");
        assert!(!a.by_worker.contains_key(&1));
        assert_eq!(a.unpair_job("h:2"), Some(2));
        assert!(a.by_worker.is_empty());
        assert!(a.by_job.is_empty());
    }

    #[test]
    fn queue_created_once() {
        let manager = JobManager::in_memory("test");
        let a = manager.job_queue("reverse");
        let b = manager.job_queue("reverse");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.queue_names(), vec!["reverse"]);
    }

    #[test]
    fn generated_unique_ids_are_distinct() {
        let manager = JobManager::in_memory("test");
        let a = manager.generate_unique_id("reverse");
        let b = manager.generate_unique_id("reverse");
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
