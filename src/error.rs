//! Error taxonomy shared by every layer of the transfer stack.
//!
//! Variants fall into four groups:
//! - **transient**: a bounded retry budget ran out (`HandshakeTimeout`,
//!   `RetriesExhausted`, `PeerSilent`, `CloseIncomplete`);
//! - **protocol violations**: the peer said something we cannot accept
//!   (`Protocol`, `Rejected`, `PeerClosed`);
//! - **resource errors**: detected before any datagram is sent (`Resource`);
//! - plumbing (`Io`, `SessionClosed`, `InvalidConfig`).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// No handshake response after the whole retry budget.
    #[error("handshake failed: no response after {attempts} attempt(s)")]
    HandshakeTimeout { attempts: u32 },

    /// One packet was retransmitted too many times without an acknowledgement.
    #[error("packet seq={seq} unacknowledged after {attempts} retransmission(s)")]
    RetriesExhausted { seq: u32, attempts: u32 },

    /// The receive side heard nothing from its peer for too long.
    #[error("peer silent for {waited:?}")]
    PeerSilent { waited: Duration },

    /// The closing exchange did not complete; local resources were released anyway.
    #[error("closing handshake incomplete after {attempts} attempt(s)")]
    CloseIncomplete { attempts: u32 },

    /// Malformed or unexpected message where a specific one was required.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The server refused the request with an `ERR:` reply.
    #[error("request rejected by server: {0}")]
    Rejected(String),

    /// The peer started closing while data was still in flight.
    #[error("peer closed the session mid-transfer")]
    PeerClosed,

    /// Missing source file, invalid destination, bad storage directory.
    #[error("{0}")]
    Resource(String),

    /// Operation attempted on a session whose socket was already released.
    #[error("session already closed")]
    SessionClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// `true` for failures caused by loss or silence rather than by a
    /// malformed exchange; a fresh attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout { .. }
                | Self::RetriesExhausted { .. }
                | Self::PeerSilent { .. }
                | Self::CloseIncomplete { .. }
        )
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;
