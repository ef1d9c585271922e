//! Transfer tuning knobs and the two enums negotiated per session.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::TransferError;
use crate::packet::MAX_PAYLOAD;

/// Error-recovery algorithm used for the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    StopAndWait,
    SelectiveRepeat,
    GoBackN,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::StopAndWait => "stop-and-wait",
            Protocol::SelectiveRepeat => "selective-repeat",
            Protocol::GoBackN => "go-back-n",
        };
        f.write_str(name)
    }
}

impl FromStr for Protocol {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sw" | "stop-and-wait" => Ok(Protocol::StopAndWait),
            "sr" | "selective-repeat" => Ok(Protocol::SelectiveRepeat),
            "gbn" | "go-back-n" => Ok(Protocol::GoBackN),
            other => Err(TransferError::InvalidConfig(format!(
                "unknown protocol {other:?} (expected sw, sr or gbn)"
            ))),
        }
    }
}

/// Direction of a transfer, seen from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Client sends a file to the server.
    Upload,
    /// Client receives a file from the server.
    Download,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Upload => "upload",
            Mode::Download => "download",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Mode::Upload),
            "download" => Ok(Mode::Download),
            other => Err(TransferError::Protocol(format!("unknown mode {other:?}"))),
        }
    }
}

/// Timeouts, window and retry budgets for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Per-attempt wait for an ACK, handshake reply or closing message.
    pub timeout: Duration,
    /// Outstanding packets allowed by the windowed engines.
    pub window_size: u32,
    /// Attempts for the handshake and closing exchanges.
    pub max_retries: u32,
    /// Retransmissions of a single packet before the sender gives up.
    /// Receivers give up after `retransmission_limit + 2` silent timeouts.
    pub retransmission_limit: u32,
    /// Payload bytes per DATA packet.
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            window_size: 4,
            max_retries: 5,
            retransmission_limit: 30,
            chunk_size: 1024,
        }
    }
}

impl TransferConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retransmission_limit(mut self, limit: u32) -> Self {
        self.retransmission_limit = limit;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// How long a receiver waits in silence before declaring the peer gone.
    pub fn receiver_patience(&self) -> Duration {
        self.timeout * (self.retransmission_limit + 2)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.timeout.is_zero() {
            return Err(TransferError::InvalidConfig("timeout must be positive".into()));
        }
        if self.window_size == 0 {
            return Err(TransferError::InvalidConfig("window size must be at least 1".into()));
        }
        if self.max_retries == 0 {
            return Err(TransferError::InvalidConfig("max retries must be at least 1".into()));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD {
            return Err(TransferError::InvalidConfig(format!(
                "chunk size must be within 1..={MAX_PAYLOAD}"
            )));
        }
        Ok(())
    }
}
