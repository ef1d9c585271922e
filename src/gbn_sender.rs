//! Go-Back-N sending engine.
//!
//! [`GbnSender`] maintains a sliding window of up to `N` in-flight packets;
//! [`send_file`] drives it over a session with a single timer.
//!
//! # Protocol contract
//!
//! - At most `window_size` packets may be in flight at once.
//! - ACKs are **cumulative**: `ACK k` means the receiver has written every
//!   packet up to and including `k`.
//! - The single timer tracks the oldest in-flight packet: it expires one
//!   timeout after that packet was last sent.
//! - On expiry, **all** unacked packets from `send_base` onwards are
//!   retransmitted (go back to N). The oldest packet's `tx_count` bounds how
//!   often this may happen.
//!
//! Sequence numbers index packets (`0..total`), so they never wrap.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::packet::{Packet, Packetizer, WindowedPacketizer};
use crate::session::Session;
use crate::transfer::TransferReport;

// ---------------------------------------------------------------------------
// GbnEntry
// ---------------------------------------------------------------------------

/// A single in-flight packet occupying one slot in the retransmit window.
#[derive(Debug, Clone)]
pub struct GbnEntry {
    pub seq: u32,
    /// The encoded DATA packet (ready to hand to the socket).
    pub packet: Vec<u8>,
    /// Total number of times this packet has been transmitted.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
}

// ---------------------------------------------------------------------------
// GbnSender
// ---------------------------------------------------------------------------

/// Go-Back-N send-side state.
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct GbnSender {
    /// Oldest unacked packet (left window edge).
    pub send_base: u32,

    /// Sequence number for the next new packet.
    pub next_seq: u32,

    window_size: usize,

    /// In-flight packets ordered by sequence number (front = oldest).
    window: VecDeque<GbnEntry>,
}

impl GbnSender {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            send_base: 0,
            next_seq: 0,
            window_size,
            window: VecDeque::with_capacity(window_size),
        }
    }

    /// `true` when there is room for at least one more in-flight packet.
    pub fn can_send(&self) -> bool {
        self.window.len() < self.window_size
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.window.is_empty()
    }

    /// Place a just-transmitted packet for `next_seq` into the window.
    pub fn record_sent(&mut self, packet: Vec<u8>) {
        debug_assert!(
            self.can_send(),
            "record_sent called on a full GBN window ({} / {})",
            self.window.len(),
            self.window_size
        );
        self.window.push_back(GbnEntry {
            seq: self.next_seq,
            packet,
            tx_count: 1,
            sent_at: Instant::now(),
        });
        self.next_seq += 1;
    }

    /// Process a cumulative ACK.
    ///
    /// Retires every entry up to and including `ack` and returns how many
    /// were retired. Returns `0` for duplicate or not-yet-sent ACKs.
    pub fn on_ack(&mut self, ack: u32) -> usize {
        if ack < self.send_base || ack >= self.next_seq {
            return 0;
        }
        let mut acked = 0usize;
        while self.window.front().is_some_and(|front| front.seq <= ack) {
            self.window.pop_front();
            acked += 1;
        }
        self.send_base = ack + 1;
        acked
    }

    /// In-flight packets from oldest to newest.
    pub fn window_entries(&self) -> impl Iterator<Item = &GbnEntry> {
        self.window.iter()
    }

    /// Bump `tx_count` and `sent_at` of every in-flight packet after a
    /// full-window retransmission.
    pub fn on_retransmit(&mut self) {
        let now = Instant::now();
        for entry in self.window.iter_mut() {
            entry.tx_count += 1;
            entry.sent_at = now;
        }
    }

    /// When the oldest in-flight packet was last sent; `None` when idle.
    /// The retransmission timer expires one timeout after this instant.
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.window.front().map(|e| e.sent_at)
    }

    /// Retransmissions already spent on the oldest in-flight packet.
    pub fn base_retransmissions(&self) -> u32 {
        self.window.front().map_or(0, |e| e.tx_count - 1)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Send `chunks` with Go-Back-N, then TERMINATE.
pub async fn send_file(
    session: &Session,
    chunks: Vec<Vec<u8>>,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let pk = WindowedPacketizer;
    let label = session.label();
    let total = u32::try_from(chunks.len()).map_err(|_| {
        TransferError::Resource(format!("{} chunks exceed the sequence space", chunks.len()))
    })?;
    let limit = config.retransmission_limit;

    let mut sender = GbnSender::new(config.window_size as usize);
    let mut report = TransferReport {
        packets: u64::from(total),
        bytes: chunks.iter().map(|c| c.len() as u64).sum(),
        ..TransferReport::default()
    };

    loop {
        while sender.can_send() && sender.next_seq < total {
            let packet = pk.make_data(sender.next_seq, &chunks[sender.next_seq as usize]);
            session.send(&packet).await?;
            log::trace!("[gbn {label}] → DATA seq={} in_flight={}", sender.next_seq, sender.in_flight() + 1);
            sender.record_sent(packet);
        }
        let Some(oldest) = sender.oldest_sent_at() else {
            break;
        };

        let sleep = tokio::time::sleep_until(oldest + config.timeout);
        tokio::pin!(sleep);

        tokio::select! {
            received = session.recv(config.timeout) => {
                let Some(bytes) = received? else {
                    continue;
                };
                if closing::is_fin(&bytes) {
                    session.note_peer_fin();
                    return Err(TransferError::PeerClosed);
                }
                if let Ok(Packet::Ack { seq }) = pk.decode(&bytes) {
                    let n = sender.on_ack(seq);
                    if n > 0 {
                        log::trace!("[gbn {label}] ← ACK {seq} (slid {n})");
                    }
                }
            }
            _ = &mut sleep => {
                if sender.base_retransmissions() >= limit {
                    log::error!("[gbn {label}] base {} unacknowledged after {limit} timeout(s)", sender.send_base);
                    return Err(TransferError::RetriesExhausted { seq: sender.send_base, attempts: limit });
                }
                log::debug!(
                    "[gbn {label}] timeout, retransmitting {} packet(s) from {}",
                    sender.in_flight(),
                    sender.send_base
                );
                for entry in sender.window_entries() {
                    session.send(&entry.packet).await?;
                }
                report.retransmissions += sender.in_flight() as u64;
                sender.on_retransmit();
            }
        }
    }

    session.send(&pk.make_terminate()).await?;
    log::debug!("[gbn {label}] → TERMINATE ({report})");
    Ok(report)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
