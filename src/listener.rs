//! Session Listener: the server's well-known port.
//!
//! ```text
//!   well-known socket ──LOGIN──▶ validate ──ok──▶ spawn worker ──▶ handshake::accept
//!          ▲                        │                                   │
//!          │                        └─bad──▶ ERR:<reason> / discard     ▼
//!          └── keeps listening                            transfer on private port
//! ```
//!
//! Workers share no mutable state. The listener alone tracks which client
//! addresses have a live worker, so a retransmitted `LOGIN` does not start a
//! second session.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

use crate::chunks::ChunkReader;
use crate::config::{Mode, Protocol, TransferConfig};
use crate::error::{Result, TransferError};
use crate::handshake::{self, Request};
use crate::simulator::SimulatorConfig;
use crate::socket::Socket;
use crate::transfer::{self, TransferReport};

pub struct Server {
    socket: Socket,
    storage: PathBuf,
    protocol: Protocol,
    config: TransferConfig,
    simulator: Option<SimulatorConfig>,
}

/// A server running on a background task.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, abort running workers and wait for the listener.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(TransferError::Resource(format!("listener task failed: {e}"))),
        }
    }
}

impl Server {
    /// Bind the well-known port. `storage` must be an existing directory.
    pub async fn bind(
        addr: SocketAddr,
        storage: impl Into<PathBuf>,
        protocol: Protocol,
        config: TransferConfig,
    ) -> Result<Self> {
        config.validate()?;
        let storage = storage.into();
        match tokio::fs::metadata(&storage).await {
            Ok(meta) if meta.is_dir() => {}
            _ => {
                return Err(TransferError::Resource(format!(
                    "storage directory {} does not exist",
                    storage.display()
                )))
            }
        }
        let socket = Socket::bind(addr).await?;
        log::info!(
            "[listener {}] serving {} with {protocol}",
            socket.local_addr(),
            storage.display()
        );
        Ok(Self {
            socket,
            storage,
            protocol,
            config,
            simulator: None,
        })
    }

    /// Inject faults into every session's data and closing traffic.
    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = Some(simulator);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn spawn(self) -> ServerHandle {
        let (shutdown, rx) = watch::channel(false);
        let addr = self.local_addr();
        let task = tokio::spawn(self.run(rx));
        ServerHandle { addr, shutdown, task }
    }

    /// Serve until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let me = self.local_addr();
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut active: HashMap<SocketAddr, AbortHandle> = HashMap::new();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("[listener {me}] worker crashed: {e}");
                    }
                    active.retain(|_, handle| !handle.is_finished());
                }
                received = self.socket.recv_from(self.config.timeout) => {
                    if let Some((bytes, from)) = survive(me, received) {
                        active.retain(|_, handle| !handle.is_finished());
                        self.on_datagram(&bytes, from, &mut active, &mut workers).await;
                    }
                }
            }
        }

        log::info!("[listener {me}] shutting down, {} worker(s) active", workers.len());
        workers.shutdown().await;
        Ok(())
    }

    async fn on_datagram(
        &self,
        bytes: &[u8],
        from: SocketAddr,
        active: &mut HashMap<SocketAddr, AbortHandle>,
        workers: &mut JoinSet<()>,
    ) {
        let me = self.local_addr();
        let request = match Request::parse_login(bytes) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("[listener {me}] discarding datagram from {from}: {e}");
                return;
            }
        };
        if active.contains_key(&from) {
            log::debug!("[listener {me}] duplicate LOGIN from {from}, session in progress");
            return;
        }

        let path = match self.admit(&request).await {
            Ok(path) => path,
            Err(reason) => {
                log::warn!("[listener {me}] rejecting {from} ({} {:?}): {reason}", request.mode, request.filename);
                if let Err(e) = self.socket.send_to(&handshake::reject_message(&reason), from).await {
                    log::warn!("[listener {me}] could not send rejection to {from}: {e}");
                }
                return;
            }
        };

        log::info!("[listener {me}] {from} requests {} {:?}", request.mode, request.filename);
        let job = Job {
            client: from,
            request,
            path,
            bind_ip: me.ip(),
            protocol: self.protocol,
            config: self.config.clone(),
            simulator: self.simulator.clone(),
        };
        let handle = workers.spawn(job.run());
        active.insert(from, handle);
    }

    /// Storage path for a request, or the reason it is refused.
    async fn admit(&self, request: &Request) -> std::result::Result<PathBuf, String> {
        if !is_plain_file_name(&request.filename) {
            return Err(format!("invalid file name {:?}", request.filename));
        }
        let path = self.storage.join(&request.filename);
        if request.mode == Mode::Download {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                _ => return Err(format!("file not found: {}", request.filename)),
            }
        }
        Ok(path)
    }
}

/// A failed receive on the well-known port is logged; the listener carries on.
fn survive(
    me: SocketAddr,
    received: std::io::Result<Option<(Vec<u8>, SocketAddr)>>,
) -> Option<(Vec<u8>, SocketAddr)> {
    match received {
        Ok(datagram) => datagram,
        Err(e) => {
            log::warn!("[listener {me}] receive failed, still listening: {e}");
            None
        }
    }
}

/// A single path component naming a file inside the storage directory.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Everything one worker needs; nothing is shared with the listener.
struct Job {
    client: SocketAddr,
    request: Request,
    path: PathBuf,
    bind_ip: IpAddr,
    protocol: Protocol,
    config: TransferConfig,
    simulator: Option<SimulatorConfig>,
}

impl Job {
    async fn run(self) {
        let client = self.client;
        match self.serve().await {
            Ok(report) => log::info!("[worker {client}] finished: {report}"),
            Err(e) => log::error!("[worker {client}] {e}"),
        }
    }

    async fn serve(self) -> Result<TransferReport> {
        let session = handshake::accept(self.client, &self.request, self.bind_ip, &self.config).await?;
        let session = Arc::new(session);
        if let Some(simulator) = self.simulator {
            session.attach_simulator(simulator)?;
        }

        match self.request.mode {
            Mode::Upload => {
                transfer::receive_file(session, &self.path, self.protocol, &self.config).await
            }
            Mode::Download => {
                let reader = match ChunkReader::open(&self.path, self.config.chunk_size).await {
                    Ok(reader) => reader,
                    Err(e) => {
                        session.abort();
                        return Err(e);
                    }
                };
                transfer::send_file(session, reader, self.protocol, &self.config).await
            }
        }
    }
}
