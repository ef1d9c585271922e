//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that adds a
//! bounded-time receive and an optional fault [`Simulator`] on the send path.
//! All protocol logic lives elsewhere; this module owns only byte I/O.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::packet::MAX_DATAGRAM;
use crate::simulator::{Fate, Simulator, SimulatorConfig};

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so one socket can be shared by the send and
/// receive flows of a session.
#[derive(Debug)]
pub struct Socket {
    local_addr: SocketAddr,
    inner: UdpSocket,
    simulator: Mutex<Option<Simulator>>,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            simulator: Mutex::new(None),
        })
    }

    /// Address this socket is bound to (with the OS-assigned port filled in).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Route every subsequent send through a fault model.
    pub fn attach_simulator(&self, config: SimulatorConfig) {
        *self.simulator.lock().expect("simulator lock poisoned") = Some(Simulator::new(config));
    }

    /// Datagrams the attached simulator has dropped so far.
    pub fn simulated_drops(&self) -> u64 {
        self.simulator
            .lock()
            .expect("simulator lock poisoned")
            .as_ref()
            .map_or(0, Simulator::dropped)
    }

    /// Send `bytes` as a single datagram to `dest`.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        match self.judge(bytes) {
            Fate::Drop => {
                log::trace!("[sim {}] dropped {} byte(s) to {dest}", self.local_addr, bytes.len());
                Ok(())
            }
            Fate::Duplicate => {
                self.inner.send_to(bytes, dest).await?;
                self.inner.send_to(bytes, dest).await?;
                Ok(())
            }
            Fate::Deliver => {
                self.inner.send_to(bytes, dest).await?;
                Ok(())
            }
        }
    }

    fn judge(&self, bytes: &[u8]) -> Fate {
        match self.simulator.lock().expect("simulator lock poisoned").as_mut() {
            Some(sim) => sim.judge(bytes),
            None => Fate::Deliver,
        }
    }

    /// Receive the next datagram, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. ICMP-induced
    /// connection-refused/reset reports are treated as "nothing arrived".
    pub async fn recv_from(&self, wait: Duration) -> io::Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match tokio::time::timeout(wait, self.inner.recv_from(&mut buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok((n, addr))) => {
                buf.truncate(n);
                Ok(Some((buf, addr)))
            }
            Ok(Err(e)) if is_transient(&e) => Ok(None),
            Ok(Err(e)) => Err(e),
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
