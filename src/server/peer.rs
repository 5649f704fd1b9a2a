use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{GearmanError, Result};
use crate::protocol::{Frame, Packet, PacketType};
use crate::scheduler::{EngineClient, EngineWorker, Job, JobKey, JobStatus};

/// Sending half of a connection's writer task.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { tx }
    }

    pub fn send(&self, packet: Packet) -> Result<()> {
        self.send_frame(Frame::Packet(packet))
    }

    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| GearmanError::Transport("connection closed".to_string()))
    }
}

fn bytes(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(data)
}

/// Worker side of a connection.
#[derive(Debug)]
pub struct NetworkWorker {
    id: u64,
    outbound: Outbound,
    abilities: Mutex<Vec<String>>,
    asleep: AtomicBool,
}

impl NetworkWorker {
    pub fn new(id: u64, outbound: Outbound) -> Self {
        Self {
            id,
            outbound,
            abilities: Mutex::new(Vec::new()),
            asleep: AtomicBool::new(false),
        }
    }

    /// Returns false if the function was already registered.
    pub fn add_ability(&self, function: &str) -> bool {
        let mut abilities = self.abilities.lock();
        if abilities.iter().any(|a| a == function) {
            return false;
        }
        abilities.push(function.to_string());
        true
    }

    pub fn remove_ability(&self, function: &str) {
        self.abilities.lock().retain(|a| a != function);
    }

    pub fn clear_abilities(&self) {
        self.abilities.lock().clear();
    }

    pub fn mark_awake(&self) {
        self.asleep.store(false, Ordering::Release);
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep.load(Ordering::Acquire)
    }
}

impl EngineWorker for NetworkWorker {
    fn id(&self) -> u64 {
        self.id
    }

    fn abilities(&self) -> Vec<String> {
        self.abilities.lock().clone()
    }

    /// Sends NOOP once per sleep; later wakes are dropped until the worker
    /// sleeps again.
    fn wake_up(&self) {
        if self.asleep.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.outbound.send(Packet::empty_response(PacketType::Noop)) {
                tracing::debug!(worker_id = self.id, error = %e, "Failed to wake worker");
            }
        }
    }

    fn mark_asleep(&self) {
        self.asleep.store(true, Ordering::Release);
    }

    fn send_job_assignment(&self, job: &Job, with_unique_id: bool) -> Result<()> {
        let handle = Bytes::from(job.job_handle.clone());
        let function = Bytes::from(job.function_name.clone());
        let packet = if with_unique_id {
            Packet::response(
                PacketType::JobAssignUniq,
                [handle, function, Bytes::from(job.unique_id.clone()), job.data.clone()],
            )
        } else {
            Packet::response(PacketType::JobAssign, [handle, function, job.data.clone()])
        };
        self.outbound.send(packet)
    }

    fn send_no_job(&self) -> Result<()> {
        self.outbound.send(Packet::empty_response(PacketType::NoJob))
    }
}

/// Client side of a connection.
#[derive(Debug)]
pub struct NetworkClient {
    id: u64,
    outbound: Outbound,
    current_job: Mutex<Option<JobKey>>,
}

impl NetworkClient {
    pub fn new(id: u64, outbound: Outbound) -> Self {
        Self {
            id,
            outbound,
            current_job: Mutex::new(None),
        }
    }

    fn send_handle_and_data(&self, kind: PacketType, job_handle: &str, data: &[u8]) -> Result<()> {
        self.outbound.send(Packet::response(
            kind,
            [Bytes::from(job_handle.to_string()), bytes(data)],
        ))
    }
}

impl EngineClient for NetworkClient {
    fn id(&self) -> u64 {
        self.id
    }

    fn current_job(&self) -> Option<JobKey> {
        self.current_job.lock().clone()
    }

    fn set_current_job(&self, job: Option<JobKey>) {
        *self.current_job.lock() = job;
    }

    fn send_work_results(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.send_handle_and_data(PacketType::WorkComplete, job_handle, data)
    }

    fn send_work_data(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.send_handle_and_data(PacketType::WorkData, job_handle, data)
    }

    fn send_work_warning(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.send_handle_and_data(PacketType::WorkWarning, job_handle, data)
    }

    fn send_work_exception(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.send_handle_and_data(PacketType::WorkException, job_handle, data)
    }

    fn send_work_fail(&self, job_handle: &str) -> Result<()> {
        self.outbound
            .send(Packet::response(PacketType::WorkFail, [job_handle.to_string()]))
    }

    fn send_work_status(&self, status: &JobStatus) -> Result<()> {
        self.outbound.send(Packet::response(
            PacketType::WorkStatus,
            [
                status.job_handle.clone(),
                status.numerator.to_string(),
                status.denominator.to_string(),
            ],
        ))
    }
}
