use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tokio_util::sync::CancellationToken;

use crate::error::{GearmanError, Result};
use crate::protocol::{Frame, GearmanCodec, Packet, PacketType};
use crate::scheduler::{EngineClient, EngineWorker, Job, JobManager, JobPriority, EPOCH_IMMEDIATE};
use crate::server::peer::{NetworkClient, NetworkWorker, Outbound};

/// Per-connection protocol state. A connection turns into a worker, a
/// client, or both, on the first packet of each kind.
pub struct Session {
    id: u64,
    peer: SocketAddr,
    manager: Arc<JobManager>,
    outbound: Outbound,
    worker: Option<Arc<NetworkWorker>>,
    client: Option<Arc<NetworkClient>>,
}

impl Session {
    pub fn new(id: u64, peer: SocketAddr, manager: Arc<JobManager>, outbound: Outbound) -> Self {
        Self {
            id,
            peer,
            manager,
            outbound,
            worker: None,
            client: None,
        }
    }

    fn worker(&mut self) -> Arc<NetworkWorker> {
        if let Some(worker) = &self.worker {
            return worker.clone();
        }
        tracing::info!(connection = self.id, peer = %self.peer, "Worker connected");
        let worker = Arc::new(NetworkWorker::new(self.id, self.outbound.clone()));
        self.worker = Some(worker.clone());
        worker
    }

    fn client(&mut self) -> Arc<NetworkClient> {
        if let Some(client) = &self.client {
            return client.clone();
        }
        let client = Arc::new(NetworkClient::new(self.id, self.outbound.clone()));
        self.client = Some(client.clone());
        client
    }

    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Packet(packet) => self.handle_packet(packet),
            Frame::Admin(command) => self.handle_admin(&command),
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        tracing::trace!(connection = self.id, kind = ?packet.kind, "Packet received");
        match packet.kind {
            PacketType::CanDo | PacketType::CanDoTimeout => {
                let function = packet.arg_str(0)?.to_string();
                let worker = self.worker();
                worker.add_ability(&function);
                let engine_worker: Arc<dyn EngineWorker> = worker;
                self.manager.register_worker_ability(&function, &engine_worker);
            }
            PacketType::CantDo => {
                let function = packet.arg_str(0)?;
                let worker = self.worker();
                worker.remove_ability(function);
                self.manager.unregister_worker_ability(function, worker.id());
            }
            PacketType::ResetAbilities => {
                let worker = self.worker();
                self.manager.reset_worker_abilities(worker.id());
                worker.clear_abilities();
            }
            PacketType::PreSleep => {
                let engine_worker: Arc<dyn EngineWorker> = self.worker();
                self.manager.mark_worker_asleep(&engine_worker);
            }
            PacketType::GrabJob | PacketType::GrabJobUniq => {
                let with_unique_id = packet.kind == PacketType::GrabJobUniq;
                self.grab_job(with_unique_id)?;
            }
            PacketType::SubmitJob
            | PacketType::SubmitJobBg
            | PacketType::SubmitJobHigh
            | PacketType::SubmitJobHighBg
            | PacketType::SubmitJobLow
            | PacketType::SubmitJobLowBg
            | PacketType::SubmitJobEpoch => self.submit_job(&packet)?,
            PacketType::SubmitJobSched => {
                self.send_error("NOT_SUPPORTED", "SUBMIT_JOB_SCHED is not supported")?;
            }
            PacketType::WorkComplete
            | PacketType::WorkFail
            | PacketType::WorkException
            | PacketType::WorkData
            | PacketType::WorkWarning => self.work_report(&packet)?,
            PacketType::WorkStatus => {
                let handle = packet.arg_str(0)?;
                let numerator = packet.arg_u32(1)?;
                let denominator = packet.arg_u32(2)?;
                self.manager.update_job_status(handle, numerator, denominator);
            }
            PacketType::GetStatus => {
                self.client();
                let status = self.manager.check_job_status(packet.arg_str(0)?);
                let flag = |b: bool| String::from(if b { "1" } else { "0" });
                self.outbound.send(Packet::response(
                    PacketType::StatusRes,
                    [
                        status.job_handle.clone(),
                        flag(status.is_known()),
                        flag(status.is_running()),
                        status.numerator.to_string(),
                        status.denominator.to_string(),
                    ],
                ))?;
            }
            PacketType::EchoReq => {
                let data = packet.arg(0)?.clone();
                self.outbound
                    .send(Packet::response(PacketType::EchoRes, [data]))?;
            }
            PacketType::OptionReq => {
                let option = packet.arg(0)?.clone();
                self.outbound
                    .send(Packet::response(PacketType::OptionRes, [option]))?;
            }
            PacketType::SetClientId | PacketType::AllYours => {}
            other => {
                tracing::warn!(connection = self.id, kind = ?other, "Unexpected packet");
                self.send_error("UNEXPECTED_PACKET", &format!("{:?} is not a request", other))?;
            }
        }
        Ok(())
    }

    fn grab_job(&mut self, with_unique_id: bool) -> Result<()> {
        let worker = self.worker();
        worker.mark_awake();

        match self.manager.next_job_for_worker(worker.as_ref()) {
            Some(job) => {
                if let Err(e) = worker.send_job_assignment(&job, with_unique_id) {
                    tracing::warn!(
                        worker_id = worker.id(),
                        handle = %job.job_handle,
                        error = %e,
                        "Failed to deliver assignment, re-enqueueing"
                    );
                    if let Err(e) = self.manager.re_enqueue_job(&job) {
                        tracing::error!(handle = %job.job_handle, error = %e, "Failed to re-enqueue job");
                    }
                    return Err(e);
                }
                Ok(())
            }
            None => worker.send_no_job(),
        }
    }

    fn submit_job(&mut self, packet: &Packet) -> Result<()> {
        let (priority, background) = match packet.kind {
            PacketType::SubmitJobBg => (JobPriority::Normal, true),
            PacketType::SubmitJobHigh => (JobPriority::High, false),
            PacketType::SubmitJobHighBg => (JobPriority::High, true),
            PacketType::SubmitJobLow => (JobPriority::Low, false),
            PacketType::SubmitJobLowBg => (JobPriority::Low, true),
            PacketType::SubmitJobEpoch => (JobPriority::Normal, true),
            _ => (JobPriority::Normal, false),
        };

        let function = packet.arg_str(0)?;
        let unique_id = packet.arg_str(1)?;
        let (time_to_run, data) = if packet.kind == PacketType::SubmitJobEpoch {
            let epoch = packet.arg_str(2)?.trim().parse::<i64>().map_err(|_| {
                GearmanError::Protocol("SUBMIT_JOB_EPOCH carries a non-numeric epoch".to_string())
            })?;
            (epoch, packet.arg(3)?.clone())
        } else {
            (EPOCH_IMMEDIATE, packet.arg(2)?.clone())
        };

        let job = Job::new(function, unique_id, data)
            .with_priority(priority)
            .with_background(background)
            .with_time_to_run(time_to_run);

        let engine_client: Arc<dyn EngineClient> = self.client();
        match self.manager.store_job_for_client(job, engine_client) {
            Ok(stored) => self
                .outbound
                .send(Packet::response(PacketType::JobCreated, [stored.job_handle])),
            Err(e) => {
                tracing::warn!(connection = self.id, function, error = %e, "Rejected submission");
                self.send_error("QUEUE_FULL", &e.to_string())
            }
        }
    }

    fn work_report(&mut self, packet: &Packet) -> Result<()> {
        let handle = packet.arg_str(0)?;
        let Some(job) = self.manager.job_by_handle(handle) else {
            tracing::debug!(connection = self.id, handle, kind = ?packet.kind, "Report for untracked job");
            return Ok(());
        };

        match packet.kind {
            PacketType::WorkComplete => self.manager.handle_work_completion(&job, packet.arg(1)?),
            PacketType::WorkFail => self.manager.handle_work_failure(&job),
            PacketType::WorkException => self.manager.handle_work_exception(&job, packet.arg(1)?),
            PacketType::WorkData => self.manager.handle_work_data(&job, packet.arg(1)?),
            PacketType::WorkWarning => self.manager.handle_work_warning(&job, packet.arg(1)?),
            _ => {}
        }
        Ok(())
    }

    fn send_error(&self, code: &str, message: &str) -> Result<()> {
        self.outbound.send(Packet::response(
            PacketType::Error,
            [code.to_string(), message.to_string()],
        ))
    }

    fn handle_admin(&mut self, command: &str) -> Result<()> {
        let mut reply = String::new();
        match command.split_whitespace().next().unwrap_or("") {
            "status" => {
                for row in self.manager.snapshot().queues {
                    let _ = writeln!(
                        reply,
                        "{}\t{}\t{}\t{}",
                        row.function, row.total, row.running, row.available_workers
                    );
                }
                reply.push_str(".\n");
            }
            "workers" => {
                for (id, abilities) in self.manager.workers() {
                    let _ = writeln!(reply, "{} - - : {}", id, abilities.join(" "));
                }
                reply.push_str(".\n");
            }
            "version" => {
                let _ = writeln!(reply, "OK {}", env!("CARGO_PKG_VERSION"));
            }
            "" => return Ok(()),
            _ => reply.push_str("ERR UNKNOWN_COMMAND Unknown+server+command\n"),
        }
        self.outbound.send_frame(Frame::Admin(reply))
    }

    /// Release everything this connection held in the engine.
    pub fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.manager.unregister_worker(worker.as_ref());
            tracing::info!(connection = self.id, peer = %self.peer, "Worker disconnected");
        }
        if let Some(client) = self.client.take() {
            self.manager.unregister_client(client.as_ref());
        }
    }
}

/// Drive one connection until the peer hangs up, a frame is malformed, or
/// shutdown is requested.
pub async fn handle_connection(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<JobManager>,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    let closing = CancellationToken::new();
    let writer = tokio::spawn(write_frames(id, write_half, rx, closing.clone()));

    let mut session = Session::new(id, peer, manager, Outbound::new(tx));
    let mut frames = FramedRead::new(read_half, GearmanCodec::new());

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if let Err(e) = session.handle_frame(frame) {
                    tracing::debug!(connection = id, error = %e, "Closing connection");
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(connection = id, peer = %peer, error = %e, "Malformed frame");
                break;
            }
            None => break,
        }
    }

    session.close();
    drop(session);
    closing.cancel();
    let _ = writer.await;
    tracing::debug!(connection = id, "Connection closed");
}

/// Writer half: drains the outbound channel onto the socket. Engine-held
/// peer handles can outlive the session, so `closing` ends the loop once
/// the queue is empty instead of waiting for every sender to drop.
async fn write_frames(
    id: u64,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    closing: CancellationToken,
) {
    let mut codec = GearmanCodec::new();
    let mut buf = BytesMut::new();

    loop {
        let frame = tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = closing.cancelled() => match rx.try_recv() {
                Ok(frame) => frame,
                Err(_) => break,
            },
        };

        if let Err(e) = codec.encode(frame, &mut buf) {
            tracing::error!(connection = id, error = %e, "Failed to encode frame");
            buf.clear();
            continue;
        }
        if let Err(e) = write_half.write_all(&buf.split()).await {
            tracing::debug!(connection = id, error = %e, "Write failed");
            break;
        }
    }
}
