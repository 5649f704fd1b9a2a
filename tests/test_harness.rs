//! Test harness for engine and broker integration tests.
//!
//! Provides in-process worker and client doubles that record every callback,
//! a broker bound to an ephemeral port, and a raw protocol connection.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;

use gearman_lite::config::{PersistenceKind, ServerConfig};
use gearman_lite::node::Node;
use gearman_lite::protocol::{Frame, GearmanCodec, Packet, PacketType};
use gearman_lite::scheduler::{EngineClient, EngineWorker, Job, JobKey, JobManager, JobStatus};
use gearman_lite::{GearmanError, Result};

// =============================================================================
// Engine doubles
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Assigned { handle: String, with_unique_id: bool },
    NoJob,
}

/// Worker that records what the engine sends it.
pub struct RecordingWorker {
    id: u64,
    abilities: Mutex<Vec<String>>,
    asleep: AtomicBool,
    wakeups: AtomicUsize,
    fail_sends: AtomicBool,
    events: Mutex<Vec<WorkerEvent>>,
}

impl RecordingWorker {
    pub fn new(id: u64, abilities: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            id,
            abilities: Mutex::new(abilities.iter().map(|a| a.to_string()).collect()),
            asleep: AtomicBool::new(false),
            wakeups: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        })
    }

    /// Register every ability with the manager.
    pub fn register(self: &Arc<Self>, manager: &JobManager) {
        let worker: Arc<dyn EngineWorker> = self.clone();
        for function in self.abilities() {
            manager.register_worker_ability(&function, &worker);
        }
    }

    pub fn as_engine(self: &Arc<Self>) -> Arc<dyn EngineWorker> {
        self.clone()
    }

    pub fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }

    pub fn is_asleep(&self) -> bool {
        self.asleep.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<WorkerEvent> {
        self.events.lock().clone()
    }
}

impl EngineWorker for RecordingWorker {
    fn id(&self) -> u64 {
        self.id
    }

    fn abilities(&self) -> Vec<String> {
        self.abilities.lock().clone()
    }

    fn wake_up(&self) {
        self.asleep.store(false, Ordering::SeqCst);
        self.wakeups.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_asleep(&self) {
        self.asleep.store(true, Ordering::SeqCst);
    }

    fn send_job_assignment(&self, job: &Job, with_unique_id: bool) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GearmanError::Transport("worker gone".to_string()));
        }
        self.events.lock().push(WorkerEvent::Assigned {
            handle: job.job_handle.clone(),
            with_unique_id,
        });
        Ok(())
    }

    fn send_no_job(&self) -> Result<()> {
        self.events.lock().push(WorkerEvent::NoJob);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Complete { handle: String, data: Bytes },
    Data { handle: String, data: Bytes },
    Warning { handle: String, data: Bytes },
    Exception { handle: String, data: Bytes },
    Fail { handle: String },
    Status(JobStatus),
}

/// Client that records every result forwarded to it.
pub struct RecordingClient {
    id: u64,
    current_job: Mutex<Option<JobKey>>,
    events: Mutex<Vec<ClientEvent>>,
}

impl RecordingClient {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            current_job: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn as_engine(self: &Arc<Self>) -> Arc<dyn EngineClient> {
        self.clone()
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: ClientEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

impl EngineClient for RecordingClient {
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
        self.record(ClientEvent::Complete {
            handle: job_handle.to_string(),
            data: Bytes::copy_from_slice(data),
        })
    }

    fn send_work_data(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.record(ClientEvent::Data {
            handle: job_handle.to_string(),
            data: Bytes::copy_from_slice(data),
        })
    }

    fn send_work_warning(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.record(ClientEvent::Warning {
            handle: job_handle.to_string(),
            data: Bytes::copy_from_slice(data),
        })
    }

    fn send_work_exception(&self, job_handle: &str, data: &[u8]) -> Result<()> {
        self.record(ClientEvent::Exception {
            handle: job_handle.to_string(),
            data: Bytes::copy_from_slice(data),
        })
    }

    fn send_work_fail(&self, job_handle: &str) -> Result<()> {
        self.record(ClientEvent::Fail {
            handle: job_handle.to_string(),
        })
    }

    fn send_work_status(&self, status: &JobStatus) -> Result<()> {
        self.record(ClientEvent::Status(status.clone()))
    }
}

// =============================================================================
// Broker over TCP
// =============================================================================

/// Handle to a broker serving on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub manager: Arc<JobManager>,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|config| config).await
    }

    pub async fn start_with(configure: impl FnOnce(ServerConfig) -> ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = configure(
            ServerConfig::new(addr)
                .with_hostname("test")
                .with_persistence(PersistenceKind::None),
        );

        let node = Node::new(config);
        let manager = node.manager.clone();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = node.serve(listener, token).await {
                eprintln!("test server exited: {}", e);
            }
        });

        Self {
            addr,
            manager,
            shutdown,
            handle,
        }
    }

    pub async fn connect(&self) -> TestConnection {
        TestConnection::connect(self.addr).await
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

/// Raw protocol connection speaking request packets.
pub struct TestConnection {
    reader: FramedRead<OwnedReadHalf, GearmanCodec>,
    writer: OwnedWriteHalf,
}

impl TestConnection {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: FramedRead::new(read_half, GearmanCodec::new()),
            writer,
        }
    }

    pub async fn send(&mut self, kind: PacketType, args: &[&[u8]]) {
        let packet = Packet::request(kind, args.iter().map(|a| Bytes::copy_from_slice(a)));
        self.send_frame(Frame::Packet(packet)).await;
    }

    pub async fn send_admin(&mut self, line: &str) {
        self.send_frame(Frame::Admin(format!("{}\n", line))).await;
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        let mut buf = BytesMut::new();
        GearmanCodec::new().encode(frame, &mut buf).unwrap();
        self.writer.write_all(&buf).await.unwrap();
    }

    /// Next frame, or None if the broker closed the connection or nothing
    /// arrived within two seconds.
    pub async fn recv(&mut self) -> Option<Frame> {
        match tokio::time::timeout(Duration::from_secs(2), self.reader.next()).await {
            Ok(Some(Ok(frame))) => Some(frame),
            _ => None,
        }
    }

    pub async fn recv_packet(&mut self) -> Packet {
        match self.recv().await {
            Some(Frame::Packet(packet)) => packet,
            other => panic!("expected a packet, got {:?}", other),
        }
    }

    pub async fn recv_admin(&mut self) -> String {
        match self.recv().await {
            Some(Frame::Admin(line)) => line,
            other => panic!("expected an admin line, got {:?}", other),
        }
    }

    /// True if nothing arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.reader.next()).await.is_err()
    }

    /// Submit and return the handle from JOB_CREATED.
    pub async fn submit(&mut self, kind: PacketType, function: &str, unique: &str, data: &[u8]) -> String {
        self.send(kind, &[function.as_bytes(), unique.as_bytes(), data]).await;
        let created = self.recv_packet().await;
        assert_eq!(created.kind, PacketType::JobCreated);
        created.arg_str(0).unwrap().to_string()
    }

    pub async fn can_do(&mut self, function: &str) {
        self.send(PacketType::CanDo, &[function.as_bytes()]).await;
    }

    /// GRAB_JOB; returns the JOB_ASSIGN packet or NO_JOB.
    pub async fn grab(&mut self) -> Packet {
        self.send(PacketType::GrabJob, &[]).await;
        self.recv_packet().await
    }
}

// =============================================================================
// Polling helpers
// =============================================================================

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
