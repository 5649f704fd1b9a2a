use bytes::{Bytes, BytesMut};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Encoder, FramedRead};
use tracing_subscriber::EnvFilter;

use gearman_lite::config::{PersistenceKind, ServerConfig};
use gearman_lite::metrics::QueueSnapshot;
use gearman_lite::node::Node;
use gearman_lite::protocol::{Frame, GearmanCodec, Packet, PacketType};
use gearman_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "gearman-lite")]
#[command(version)]
#[command(about = "A Gearman job broker with priority queues and unique-id coalescing")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a broker
    Server(ServerArgs),

    /// Submit jobs and query their status
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Text admin protocol commands
    Admin {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: AdminCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on
    #[arg(long, default_value = "4730")]
    port: u16,

    /// Prefix for job handles (defaults to $HOSTNAME)
    #[arg(long)]
    hostname: Option<String>,

    /// Maximum queued jobs per function (unbounded if omitted)
    #[arg(long)]
    max_queue_size: Option<usize>,

    /// Number of WORK_EXCEPTION reports to keep
    #[arg(long, default_value = "1000")]
    exception_capacity: usize,

    /// Job persistence backend
    #[arg(long, default_value = "none")]
    persistence: PersistenceArg,
}

#[derive(Debug, Clone, ValueEnum)]
enum PersistenceArg {
    None,
    Memory,
}

impl From<PersistenceArg> for PersistenceKind {
    fn from(arg: PersistenceArg) -> Self {
        match arg {
            PersistenceArg::None => PersistenceKind::None,
            PersistenceArg::Memory => PersistenceKind::Memory,
        }
    }
}

// =============================================================================
// Client Arguments (shared by job and admin commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Broker address
    #[arg(long, short = 'a', default_value = "127.0.0.1:4730")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PriorityArg {
    High,
    Normal,
    Low,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a job and, unless it runs in the background, wait for its result
    Submit {
        /// Function name
        function: String,

        /// Job payload
        payload: String,

        /// Unique ID; the broker generates one when empty
        #[arg(long, default_value = "")]
        unique: String,

        #[arg(long, default_value = "normal")]
        priority: PriorityArg,

        /// Do not wait for the result
        #[arg(long)]
        background: bool,

        /// Run no earlier than this epoch second (implies --background)
        #[arg(long)]
        epoch: Option<i64>,
    },
    /// Get status of a job handle
    Status {
        /// Job handle returned by submit
        handle: String,
    },
}

// =============================================================================
// Admin Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum AdminCommands {
    /// Per-function queue depth, running jobs and available workers
    Status,
    /// Connected workers and their functions
    Workers,
    /// Broker version
    Version,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_handle: String,
    background: bool,
    result: Option<String>,
}

#[derive(Serialize)]
struct JobStatusOutput {
    job_handle: String,
    known: bool,
    running: bool,
    numerator: u32,
    denominator: u32,
}

// =============================================================================
// Broker Connection
// =============================================================================

struct BrokerConnection {
    reader: FramedRead<OwnedReadHalf, GearmanCodec>,
    writer: OwnedWriteHalf,
}

impl BrokerConnection {
    async fn connect(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read_half, GearmanCodec::new()),
            writer,
        })
    }

    async fn send(&mut self, frame: Frame) -> Result<(), Box<dyn std::error::Error>> {
        let mut buf = BytesMut::new();
        GearmanCodec::new().encode(frame, &mut buf)?;
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        match self.reader.next().await {
            Some(frame) => Ok(frame?),
            None => Err("broker closed the connection".into()),
        }
    }

    async fn recv_packet(&mut self) -> Result<Packet, Box<dyn std::error::Error>> {
        match self.recv().await? {
            Frame::Packet(packet) if packet.kind == PacketType::Error => Err(format!(
                "broker error {}: {}",
                packet.arg_str(0).unwrap_or("?"),
                packet.arg_str(1).unwrap_or("")
            )
            .into()),
            Frame::Packet(packet) => Ok(packet),
            Frame::Admin(line) => Err(format!("unexpected text reply: {}", line).into()),
        }
    }

    /// Send an admin command and collect reply lines up to the `.` terminator.
    async fn admin(&mut self, command: &str, multiline: bool) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        self.send(Frame::Admin(format!("{}\n", command))).await?;
        let mut lines = Vec::new();
        loop {
            let Frame::Admin(line) = self.recv().await? else {
                return Err("unexpected binary reply".into());
            };
            if line.starts_with("ERR") {
                return Err(line.into());
            }
            if !multiline {
                lines.push(line);
                break;
            }
            if line == "." {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let mut config = ServerConfig::new(listen_addr)
        .with_max_queue_size(args.max_queue_size)
        .with_exception_capacity(args.exception_capacity)
        .with_persistence(args.persistence.into());
    if let Some(hostname) = args.hostname {
        config = config.with_hostname(hostname);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        hostname = %config.engine.hostname,
        max_queue_size = ?config.engine.max_queue_size,
        persistence = ?config.engine.persistence,
        "Starting gearman-lite"
    );

    let shutdown = install_shutdown_handler();
    Node::new(config).run(shutdown).await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn submit_packet_type(priority: PriorityArg, background: bool) -> PacketType {
    match (priority, background) {
        (PriorityArg::High, false) => PacketType::SubmitJobHigh,
        (PriorityArg::High, true) => PacketType::SubmitJobHighBg,
        (PriorityArg::Normal, false) => PacketType::SubmitJob,
        (PriorityArg::Normal, true) => PacketType::SubmitJobBg,
        (PriorityArg::Low, false) => PacketType::SubmitJobLow,
        (PriorityArg::Low, true) => PacketType::SubmitJobLowBg,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_job_submit(
    conn: &mut BrokerConnection,
    function: String,
    payload: String,
    unique: String,
    priority: PriorityArg,
    background: bool,
    epoch: Option<i64>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let background = background || epoch.is_some();
    let packet = match epoch {
        Some(epoch) => Packet::request(
            PacketType::SubmitJobEpoch,
            [function, unique, epoch.to_string(), payload],
        ),
        None => Packet::request(
            submit_packet_type(priority, background),
            [function, unique, payload],
        ),
    };
    conn.send(Frame::Packet(packet)).await?;

    let created = conn.recv_packet().await?;
    if created.kind != PacketType::JobCreated {
        return Err(format!("expected JOB_CREATED, got {:?}", created.kind).into());
    }
    let handle = created.arg_str(0)?.to_string();

    let mut result: Option<Bytes> = None;
    if !background {
        loop {
            let packet = conn.recv_packet().await?;
            if packet.arg_str(0).ok() != Some(handle.as_str()) {
                continue;
            }
            match packet.kind {
                PacketType::WorkComplete => {
                    result = Some(packet.arg(1)?.clone());
                    break;
                }
                PacketType::WorkFail => return Err(format!("job {} failed", handle).into()),
                PacketType::WorkException => {
                    return Err(format!(
                        "job {} raised: {}",
                        handle,
                        String::from_utf8_lossy(packet.arg(1)?)
                    )
                    .into())
                }
                PacketType::WorkData | PacketType::WorkWarning => {
                    eprintln!("{:?}: {}", packet.kind, String::from_utf8_lossy(packet.arg(1)?));
                }
                PacketType::WorkStatus => {
                    eprintln!("progress: {}/{}", packet.arg_str(1)?, packet.arg_str(2)?);
                }
                _ => {}
            }
        }
    }

    let result = result.map(|r| String::from_utf8_lossy(&r).into_owned());
    match output_format {
        OutputFormat::Json => {
            let output = JobSubmitOutput {
                job_handle: handle,
                background,
                result,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Job Handle: {}", handle);
            if let Some(result) = result {
                println!("Result:");
                for line in result.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

async fn handle_job_status(
    conn: &mut BrokerConnection,
    handle: String,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    conn.send(Frame::Packet(Packet::request(PacketType::GetStatus, [handle])))
        .await?;
    let packet = conn.recv_packet().await?;
    if packet.kind != PacketType::StatusRes {
        return Err(format!("expected STATUS_RES, got {:?}", packet.kind).into());
    }

    let output = JobStatusOutput {
        job_handle: packet.arg_str(0)?.to_string(),
        known: packet.arg_str(1)? == "1",
        running: packet.arg_str(2)? == "1",
        numerator: packet.arg_u32(3)?,
        denominator: packet.arg_u32(4)?,
    };

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!("Job Handle: {}", output.job_handle);
            println!("Known:      {}", output.known);
            println!("Running:    {}", output.running);
            if output.denominator > 0 {
                println!("Progress:   {}/{}", output.numerator, output.denominator);
            }
        }
    }
    Ok(())
}

fn parse_status_line(line: &str) -> Option<QueueSnapshot> {
    let mut fields = line.split('\t');
    let function = fields.next()?.to_string();
    let total = fields.next()?.parse().ok()?;
    let running = fields.next()?.parse().ok()?;
    let available_workers = fields.next()?.parse().ok()?;
    Some(QueueSnapshot {
        function,
        total,
        high: 0,
        normal: 0,
        low: 0,
        running,
        available_workers,
    })
}

async fn handle_admin_status(
    conn: &mut BrokerConnection,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let rows: Vec<QueueSnapshot> = conn
        .admin("status", true)
        .await?
        .iter()
        .filter_map(|line| parse_status_line(line.as_str()))
        .collect();

    match output_format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Row<'a> {
                function: &'a str,
                total: usize,
                running: usize,
                available_workers: usize,
            }
            let rows: Vec<Row> = rows
                .iter()
                .map(|r| Row {
                    function: &r.function,
                    total: r.total,
                    running: r.running,
                    available_workers: r.available_workers,
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No functions registered.");
            } else {
                println!("{:<30} {:>8} {:>8} {:>8}", "FUNCTION", "QUEUED", "RUNNING", "WORKERS");
                println!("{}", "-".repeat(57));
                for row in &rows {
                    println!(
                        "{:<30} {:>8} {:>8} {:>8}",
                        row.function, row.total, row.running, row.available_workers
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_admin_workers(
    conn: &mut BrokerConnection,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let lines = conn.admin("workers", true).await?;
    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
        OutputFormat::Table => {
            for line in lines {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let mut conn = BrokerConnection::connect(&client.addr).await?;
            match command {
                JobCommands::Submit {
                    function,
                    payload,
                    unique,
                    priority,
                    background,
                    epoch,
                } => {
                    handle_job_submit(
                        &mut conn,
                        function,
                        payload,
                        unique,
                        priority,
                        background,
                        epoch,
                        &client.output,
                    )
                    .await?;
                }
                JobCommands::Status { handle } => {
                    handle_job_status(&mut conn, handle, &client.output).await?;
                }
            }
        }
        Commands::Admin { client, command } => {
            let mut conn = BrokerConnection::connect(&client.addr).await?;
            match command {
                AdminCommands::Status => handle_admin_status(&mut conn, &client.output).await?,
                AdminCommands::Workers => handle_admin_workers(&mut conn, &client.output).await?,
                AdminCommands::Version => {
                    for line in conn.admin("version", false).await? {
                        println!("{}", line);
                    }
                }
            }
        }
    }

    Ok(())
}
