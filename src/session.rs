//! Datagram Session: one bound socket talking to one fixed peer.
//!
//! A [`Session`] is produced by a successful handshake and owned by exactly
//! one party (the client, or the server worker for that connection). Engines
//! share it through an `Arc` between their send and receive flows; it is
//! never handed to another session.
//!
//! Responsibilities:
//! - Filtering out datagrams that do not come from the peer.
//! - Tracking [`SessionState`], including an unsolicited peer `FIN`.
//! - Running the closing exchange exactly once ([`Session::close`]) and
//!   releasing the socket exactly once, even when close and abort race.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;

use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::handshake;
use crate::simulator::SimulatorConfig;
use crate::socket::Socket;
use crate::state::SessionState;

#[derive(Debug)]
pub struct Session {
    local: SocketAddr,
    peer: SocketAddr,
    /// `None` once released. Flows clone the `Arc` per operation, so the OS
    /// socket goes away when the last in-flight call returns.
    socket: RwLock<Option<Arc<Socket>>>,
    state: Mutex<SessionState>,
    close_started: AtomicBool,
    peer_fin: AtomicBool,
    /// Client side: answer a re-sent handshake `ACK:` with `ALL:OK`.
    confirms_handshake: bool,
    label: String,
}

impl Session {
    pub fn new(socket: Socket, peer: SocketAddr) -> Self {
        let local = socket.local_addr();
        Self {
            local,
            peer,
            socket: RwLock::new(Some(Arc::new(socket))),
            state: Mutex::new(SessionState::Open),
            close_started: AtomicBool::new(false),
            peer_fin: AtomicBool::new(false),
            confirms_handshake: false,
            label: format!("{local}->{peer}"),
        }
    }

    /// Session on the client side of a handshake.
    pub(crate) fn confirming_handshake(mut self) -> Self {
        self.confirms_handshake = true;
        self
    }

    /// `local->peer`, used as the logging context of every component.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state poisoned")
    }

    pub fn attach_simulator(&self, config: SimulatorConfig) -> Result<()> {
        self.socket()?.attach_simulator(config);
        Ok(())
    }

    pub fn simulated_drops(&self) -> u64 {
        self.socket().map_or(0, |s| s.simulated_drops())
    }

    fn socket(&self) -> Result<Arc<Socket>> {
        self.socket
            .read()
            .expect("session socket poisoned")
            .clone()
            .ok_or(TransferError::SessionClosed)
    }

    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().expect("session state poisoned");
        if state.can_become(next) {
            log::debug!("[session {}] {} -> {}", self.label, *state, next);
            *state = next;
        }
    }

    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let socket = self.socket()?;
        socket.send_to(bytes, self.peer).await?;
        Ok(())
    }

    /// Next datagram from the peer, or `None` after `wait` elapses.
    ///
    /// Datagrams from other addresses are discarded without consuming the
    /// caller's budget beyond the time they took to arrive.
    pub async fn recv(&self, wait: Duration) -> Result<Option<Vec<u8>>> {
        let socket = self.socket()?;
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some((bytes, from)) = socket.recv_from(remaining).await? else {
                return Ok(None);
            };
            if from != self.peer {
                log::debug!("[session {}] ignoring datagram from stranger {from}", self.label);
                continue;
            }
            if self.confirms_handshake && handshake::is_accept_reply(&bytes) {
                log::debug!("[session {}] server repeated its ACK; re-confirming", self.label);
                socket.send_to(handshake::CONFIRM, self.peer).await?;
                continue;
            }
            return Ok(Some(bytes));
        }
    }

    /// Record an unsolicited `FIN` seen during data exchange.
    pub fn note_peer_fin(&self) {
        self.peer_fin.store(true, Ordering::SeqCst);
        self.transition(SessionState::Closing);
    }

    pub fn peer_fin_seen(&self) -> bool {
        self.peer_fin.load(Ordering::SeqCst)
    }

    /// Run the closing exchange and release the socket.
    ///
    /// Only the first call does anything; later calls return `Ok(())`
    /// without touching the wire. The socket is released even when the
    /// exchange fails.
    pub async fn close(&self, config: &TransferConfig) -> Result<()> {
        if self.close_started.swap(true, Ordering::SeqCst) {
            log::debug!("[session {}] close already done", self.label);
            return Ok(());
        }
        self.transition(SessionState::Closing);
        let outcome = closing::negotiate(self, config).await;
        self.release();
        outcome
    }

    /// Release the socket without a closing exchange (failed transfers).
    pub fn abort(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("[session {}] aborted", self.label);
        self.release();
    }

    fn release(&self) {
        let released = self.socket.write().expect("session socket poisoned").take();
        if released.is_some() {
            self.transition(SessionState::Closed);
        }
    }
}
