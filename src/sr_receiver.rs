//! Selective-Repeat receiving engine.
//!
//! [`ReceiveBuffer`] holds out-of-order payloads and decides what to
//! acknowledge; [`receive_file`] runs it against a session.
//!
//! ```text
//!        expected-W         expected          expected+W
//!   ──────────┼────────────────┼─────────────────┼──────────▶ seq
//!   cumulative│  re-ack seq    │ ack seq, buffer │ cumulative
//!      re-ack │ (ACK was lost) │  and flush      │   re-ack
//! ```
//!
//! Only sequences inside `[expected, expected + W)` are stored, so at most
//! `W` payloads are ever buffered.

use std::collections::BTreeMap;

use crate::chunks::ChunkWriter;
use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::packet::{Packet, Packetizer, WindowedPacketizer};
use crate::session::Session;
use crate::transfer::TransferReport;

/// What to do after one DATA packet.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Sequence to acknowledge, if any.
    pub ack: Option<u32>,
    /// Payloads now contiguous, in delivery order.
    pub deliver: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct ReceiveBuffer {
    expected: u32,
    window_size: u32,
    pending: BTreeMap<u32, Vec<u8>>,
    peak: usize,
}

impl ReceiveBuffer {
    pub fn new(window_size: u32) -> Self {
        Self {
            expected: 0,
            window_size: window_size.max(1),
            pending: BTreeMap::new(),
            peak: 0,
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Largest number of out-of-order payloads held at once.
    pub fn peak(&self) -> usize {
        self.peak
    }

    fn cumulative_ack(&self) -> Option<u32> {
        self.expected.checked_sub(1)
    }

    pub fn accept(&mut self, seq: u32, payload: &[u8]) -> Outcome {
        let ahead = seq.wrapping_sub(self.expected);
        if seq >= self.expected && ahead < self.window_size {
            self.pending.entry(seq).or_insert_with(|| payload.to_vec());
            self.peak = self.peak.max(self.pending.len());
            let mut deliver = Vec::new();
            while let Some(chunk) = self.pending.remove(&self.expected) {
                deliver.push(chunk);
                self.expected += 1;
            }
            return Outcome { ack: Some(seq), deliver };
        }

        let behind = self.expected.wrapping_sub(seq);
        if seq < self.expected && behind <= self.window_size {
            // Already delivered; the sender is still waiting for this ACK.
            return Outcome { ack: Some(seq), deliver: Vec::new() };
        }

        Outcome {
            ack: self.cumulative_ack(),
            deliver: Vec::new(),
        }
    }
}

pub async fn receive_file(
    session: &Session,
    sink: &mut ChunkWriter,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let pk = WindowedPacketizer;
    let label = session.label();
    let patience = config.receiver_patience();

    let mut buffer = ReceiveBuffer::new(config.window_size);
    let mut report = TransferReport::default();

    loop {
        let Some(bytes) = session.recv(patience).await? else {
            log::error!("[sr {label}] no traffic for {patience:?}, giving up");
            return Err(TransferError::PeerSilent { waited: patience });
        };
        if closing::is_fin(&bytes) {
            log::debug!("[sr {label}] FIN before TERMINATE; treating transfer as complete");
            session.note_peer_fin();
            break;
        }
        match pk.decode(&bytes) {
            Ok(Packet::Data { seq, payload }) => {
                let outcome = buffer.accept(seq, payload);
                for chunk in &outcome.deliver {
                    sink.write_chunk(chunk).await?;
                    report.packets += 1;
                    report.bytes += chunk.len() as u64;
                }
                match outcome.ack {
                    Some(ack) => {
                        session.send(&pk.make_ack(ack)).await?;
                        log::trace!(
                            "[sr {label}] ← DATA seq={seq} → ACK {ack} (expected {}, buffered {})",
                            buffer.expected(),
                            buffer.buffered()
                        );
                    }
                    None => log::debug!("[sr {label}] DATA seq={seq} far outside window, dropped"),
                }
            }
            Ok(Packet::Terminate) => {
                if buffer.buffered() > 0 {
                    log::warn!(
                        "[sr {label}] TERMINATE with {} packet(s) still buffered",
                        buffer.buffered()
                    );
                }
                log::debug!("[sr {label}] ← TERMINATE after {} packet(s)", report.packets);
                break;
            }
            Ok(Packet::Ack { .. }) => {}
            Err(e) => log::debug!("[sr {label}] ignoring datagram: {e}"),
        }
    }

    report.peak_buffered = buffer.peak() as u64;
    Ok(report)
}
