//! The message stream endpoint and its I/O worker.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use portavoz_proto::{Lane, OpCode, PACKET_SIZE, Packet, Reassembler, StreamId};
use socket2::{Domain, SockAddr, Socket, Type};

use crate::{Error, Result};

/// Which side of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bind the socket path, accept a single client.
    Server,
    /// Connect to the socket path, retrying every poll cycle.
    Client,
}

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Filesystem path of the unix socket.
    pub socket_path: PathBuf,
    /// Server or client side.
    pub role: Role,
    /// Run the keep-alive protocol (HELLO at 90% idle, disconnect at 100%).
    pub keep_alive: bool,
    /// Idle window after which a silent peer is dropped.
    pub idle_timeout: Duration,
    /// Worker poll cadence; all blocking is bounded by this.
    pub poll_interval: Duration,
}

impl StreamConfig {
    /// Config with the conventional defaults for a channel endpoint.
    pub fn new(socket_path: impl Into<PathBuf>, role: Role) -> Self {
        Self {
            socket_path: socket_path.into(),
            role,
            keep_alive: true,
            idle_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Override the keep-alive flag.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Override the idle timeout.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// State shared between the callers and the worker. The FIFOs are the only
/// synchronization surface; the socket itself is confined to the worker.
struct Shared {
    running: AtomicBool,
    connected: AtomicBool,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    inbound: Mutex<VecDeque<Vec<u8>>>,
}

/// One endpoint of a local message stream.
///
/// Construction binds (server) and spawns the worker; dropping the stream
/// stops the worker, joins it, and closes the socket.
pub struct MessageStream {
    shared: Arc<Shared>,
    channel: String,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("channel", &self.channel)
            .field("connected", &self.connected())
            .finish()
    }
}

impl MessageStream {
    /// Create the endpoint and start its worker.
    ///
    /// Server role: the parent directory is created if missing, a stale
    /// socket file is unlinked, and bind/listen failures are returned here
    /// rather than from the worker.
    pub fn open(config: StreamConfig) -> Result<Self> {
        let channel = config
            .socket_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stream".to_string());

        let endpoint = match config.role {
            Role::Server => {
                let socket_error = |e: std::io::Error| Error::Socket {
                    path: config.socket_path.clone(),
                    source: e,
                };

                if let Some(parent) = config.socket_path.parent() {
                    std::fs::create_dir_all(parent).map_err(socket_error)?;
                }
                // Might be left over from an unclean shutdown.
                let _ = std::fs::remove_file(&config.socket_path);

                // std's UnixListener offers no backlog control; go through
                // socket2 so the single-client contract is enforced by the
                // kernel (backlog 1) instead of a queue of waiting peers.
                let socket = Socket::new(Domain::UNIX, Type::STREAM, None)
                    .map_err(socket_error)?;
                let address =
                    SockAddr::unix(&config.socket_path).map_err(socket_error)?;
                socket.bind(&address).map_err(socket_error)?;
                socket.listen(1).map_err(socket_error)?;

                let listener: UnixListener = socket.into();
                listener.set_nonblocking(true).map_err(socket_error)?;

                tracing::info!(channel = %channel, path = %config.socket_path.display(), "channel socket available");
                Endpoint::Listen(listener)
            }
            Role::Client => Endpoint::Connect(config.socket_path.clone()),
        };

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            outbound: Mutex::new(VecDeque::new()),
            inbound: Mutex::new(VecDeque::new()),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_channel = channel.clone();
        let worker = std::thread::Builder::new()
            .name(format!("stream-{channel}"))
            .spawn(move || {
                Worker::new(worker_shared, worker_channel, config, endpoint).run();
            })
            .map_err(Error::Spawn)?;

        Ok(Self {
            shared,
            channel,
            worker: Some(worker),
        })
    }

    /// Enqueue one outbound message. `message[0]` is the opcode; an empty
    /// message is rejected with `InvalidArgument`.
    pub fn send(&self, message: Vec<u8>) -> Result<()> {
        if message.is_empty() {
            return Err(Error::InvalidArgument(
                "message must carry at least the opcode byte".into(),
            ));
        }
        self.shared.outbound.lock().unwrap().push_back(message);
        Ok(())
    }

    /// Pop the oldest complete inbound message, if any.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.shared.inbound.lock().unwrap().pop_front()
    }

    /// True when at least one inbound message is waiting.
    pub fn inbound_available(&self) -> bool {
        !self.shared.inbound.lock().unwrap().is_empty()
    }

    /// Purge inbound messages, optionally only those with one opcode.
    pub fn clear_recv(&self, opcode: Option<OpCode>) {
        let mut inbound = self.shared.inbound.lock().unwrap();
        match opcode {
            Some(op) => inbound.retain(|m| OpCode::of(m) != op),
            None => inbound.clear(),
        }
    }

    /// Observable connection state.
    pub fn connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Stop the worker and wait for it to close the socket.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Endpoint {
    Listen(UnixListener),
    Connect(PathBuf),
}

/// A packet whose bytes were only partially written; must complete before
/// anything else goes on the wire.
struct PendingWrite {
    bytes: [u8; PACKET_SIZE],
    offset: usize,
    lane: usize,
}

/// The I/O worker. Owns the socket, the reassembly buffers, and the
/// per-stream write lanes for the lifetime of the endpoint.
struct Worker {
    shared: Arc<Shared>,
    channel: String,
    config: StreamConfig,
    endpoint: Endpoint,

    socket: Option<UnixStream>,
    reassembler: Reassembler,
    lanes: [Lane; StreamId::COUNT],
    pending_write: Option<PendingWrite>,
    read_buf: [u8; PACKET_SIZE],
    read_fill: usize,
    last_inbound: Instant,
    hello_sent: bool,
}

impl Worker {
    fn new(shared: Arc<Shared>, channel: String, config: StreamConfig, endpoint: Endpoint) -> Self {
        Self {
            shared,
            channel,
            config,
            endpoint,
            socket: None,
            reassembler: Reassembler::new(),
            lanes: [Lane::new(StreamId::Speech), Lane::new(StreamId::Command)],
            pending_write: None,
            read_buf: [0u8; PACKET_SIZE],
            read_fill: 0,
            last_inbound: Instant::now(),
            hello_sent: false,
        }
    }

    fn run(mut self) {
        while self.shared.running.load(Ordering::Acquire) {
            if self.socket.is_none() && !self.establish() {
                std::thread::sleep(self.config.poll_interval);
                continue;
            }

            if self.config.keep_alive && !self.keep_alive_tick() {
                continue;
            }

            self.fill_lanes();

            let wrote = match self.write_cycle() {
                Ok(wrote) => wrote,
                Err(e) => {
                    tracing::error!(channel = %self.channel, error = %e, "socket write failed");
                    self.disconnect();
                    continue;
                }
            };

            let read = match self.read_cycle() {
                Ok(read) => read,
                Err(e) => {
                    if e.kind() != ErrorKind::UnexpectedEof {
                        tracing::error!(channel = %self.channel, error = %e, "socket read failed");
                    }
                    self.disconnect();
                    continue;
                }
            };

            if !wrote && !read {
                std::thread::sleep(self.config.poll_interval);
            }
        }

        self.disconnect();
        if let Endpoint::Listen(_) = &self.endpoint {
            let _ = std::fs::remove_file(&self.config.socket_path);
        }
    }

    /// Try to obtain a connection. Returns true when one is live.
    fn establish(&mut self) -> bool {
        let socket = match &self.endpoint {
            Endpoint::Listen(listener) => match listener.accept() {
                Ok((socket, _)) => {
                    // A new client must not see the previous client's
                    // queued traffic.
                    self.shared.outbound.lock().unwrap().clear();
                    self.shared.inbound.lock().unwrap().clear();
                    tracing::info!(channel = %self.channel, "client connection accepted");
                    socket
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) => {
                    tracing::error!(channel = %self.channel, error = %e, "accept failed");
                    return false;
                }
            },
            Endpoint::Connect(path) => match UnixStream::connect(path) {
                Ok(socket) => {
                    tracing::info!(channel = %self.channel, "connected to server");
                    socket
                }
                // Server not up (yet); retried next cycle.
                Err(_) => return false,
            },
        };

        if let Err(e) = socket.set_nonblocking(true) {
            tracing::error!(channel = %self.channel, error = %e, "failed to set socket non-blocking");
            return false;
        }

        self.reassembler.reset();
        for lane in &mut self.lanes {
            lane.clear();
        }
        self.pending_write = None;
        self.read_fill = 0;
        self.last_inbound = Instant::now();
        self.hello_sent = false;

        self.socket = Some(socket);
        self.shared.connected.store(true, Ordering::Release);
        true
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            tracing::info!(channel = %self.channel, "connection closed");
        }
        self.shared.connected.store(false, Ordering::Release);
        self.reassembler.reset();
        for lane in &mut self.lanes {
            lane.clear();
        }
        self.pending_write = None;
        self.read_fill = 0;
    }

    /// Heartbeat bookkeeping. Returns false when the connection was closed
    /// for idleness.
    fn keep_alive_tick(&mut self) -> bool {
        let idle = self.last_inbound.elapsed();

        if idle >= self.config.idle_timeout {
            tracing::warn!(channel = %self.channel, idle_s = idle.as_secs(), "peer idle timeout");
            self.disconnect();
            return false;
        }

        if !self.hello_sent && idle >= self.config.idle_timeout.mul_f64(0.9) {
            self.shared
                .outbound
                .lock()
                .unwrap()
                .push_back(portavoz_proto::command_message(OpCode::Hello));
            self.hello_sent = true;
        }

        true
    }

    /// Move queued messages onto idle lanes, preserving FIFO order for
    /// messages whose lane is still occupied.
    fn fill_lanes(&mut self) {
        let mut queue = self.shared.outbound.lock().unwrap();
        if queue.is_empty() {
            return;
        }

        let mut remaining = VecDeque::with_capacity(queue.len());
        while let Some(message) = queue.pop_front() {
            let lane = &mut self.lanes[OpCode::of(&message).stream().index()];
            if lane.is_idle() {
                // Load cannot fail on an idle lane.
                let _ = lane.load(message);
            } else {
                remaining.push_back(message);
            }
        }
        *queue = remaining;
    }

    /// Write packets round-robin across lanes until everything in flight is
    /// out or the socket stops taking bytes. Returns whether any byte was
    /// written.
    fn write_cycle(&mut self) -> std::io::Result<bool> {
        let Some(mut socket) = self.socket.take() else {
            return Ok(false);
        };
        let result = self.write_cycle_inner(&mut socket);
        self.socket = Some(socket);
        result
    }

    fn write_cycle_inner(&mut self, socket: &mut UnixStream) -> std::io::Result<bool> {
        let mut wrote = false;

        // A half-written packet always goes first; interleaving anything
        // else would corrupt the packet boundary.
        if let Some(pending) = self.pending_write.as_mut() {
            match write_available(socket, &pending.bytes[pending.offset..])? {
                Some(n) => {
                    pending.offset += n;
                    wrote |= n > 0;
                    if pending.offset == PACKET_SIZE {
                        let lane = pending.lane;
                        self.lanes[lane].advance();
                        self.pending_write = None;
                    } else {
                        return Ok(wrote);
                    }
                }
                None => return Ok(wrote),
            }
        }

        // One packet per lane per round, so a long SPEECH message cannot
        // monopolize the wire against COMMAND traffic.
        loop {
            let mut progressed = false;

            for lane_index in 0..self.lanes.len() {
                let Some(packet) = self.lanes[lane_index].next_packet() else {
                    continue;
                };
                let bytes = packet.to_bytes();
                let mut offset = 0;

                loop {
                    match write_available(socket, &bytes[offset..])? {
                        Some(n) => {
                            offset += n;
                            wrote |= n > 0;
                            if offset == PACKET_SIZE {
                                self.lanes[lane_index].advance();
                                progressed = true;
                                break;
                            }
                        }
                        None => {
                            self.pending_write = Some(PendingWrite {
                                bytes,
                                offset,
                                lane: lane_index,
                            });
                            return Ok(wrote);
                        }
                    }
                }
            }

            if !progressed {
                return Ok(wrote);
            }
        }
    }

    /// Read packets until the socket runs dry, feeding the reassembler and
    /// depositing complete messages. Returns whether any byte arrived.
    fn read_cycle(&mut self) -> std::io::Result<bool> {
        let Some(mut socket) = self.socket.take() else {
            return Ok(false);
        };
        let result = self.read_cycle_inner(&mut socket);
        self.socket = Some(socket);
        result
    }

    fn read_cycle_inner(&mut self, socket: &mut UnixStream) -> std::io::Result<bool> {
        let mut read_any = false;

        loop {
            match socket.read(&mut self.read_buf[self.read_fill..]) {
                Ok(0) => {
                    // Orderly shutdown by the peer.
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    ));
                }
                Ok(n) => {
                    read_any = true;
                    self.read_fill += n;
                    self.last_inbound = Instant::now();
                    self.hello_sent = false;

                    if self.read_fill == PACKET_SIZE {
                        self.read_fill = 0;
                        self.ingest_packet()?;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(read_any),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Decode and reassemble one full packet buffer.
    fn ingest_packet(&mut self) -> std::io::Result<()> {
        let packet = Packet::from_bytes(&self.read_buf).map_err(|e| {
            std::io::Error::new(ErrorKind::InvalidData, e.to_string())
        })?;

        match self.reassembler.push(&packet) {
            Ok(Some(message)) => {
                // HELLO is pure liveness: it refreshed the idle timer
                // above and is never delivered.
                if OpCode::of(&message.payload) != OpCode::Hello {
                    self.shared.inbound.lock().unwrap().push_back(message.payload);
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(std::io::Error::new(ErrorKind::InvalidData, e.to_string())),
        }
    }
}

/// Write what the socket will take. `Ok(None)` means would-block.
fn write_available(socket: &mut UnixStream, bytes: &[u8]) -> std::io::Result<Option<usize>> {
    loop {
        match socket.write(bytes) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "socket accepted zero bytes",
                ));
            }
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
