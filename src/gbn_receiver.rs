//! Go-Back-N receiving engine.
//!
//! - Only **in-order** packets are accepted (`seq == expected`).
//! - Out-of-order or duplicate packets are **discarded** without buffering.
//! - After every DATA packet (accepted or not) a **cumulative ACK** for
//!   `expected - 1` goes back, telling the sender the last packet written.
//!   Nothing is acknowledged before packet 0 arrives.

use crate::chunks::ChunkWriter;
use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::packet::{Packet, Packetizer, WindowedPacketizer};
use crate::session::Session;
use crate::transfer::TransferReport;

// ---------------------------------------------------------------------------
// GbnReceiver
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct GbnReceiver {
    /// Next expected sequence number.
    pub expected: u32,
}

impl GbnReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `seq` is the next packet; the caller then writes its payload.
    pub fn on_segment(&mut self, seq: u32) -> bool {
        if seq == self.expected {
            self.expected += 1;
            true
        } else {
            false
        }
    }

    /// Cumulative ACK for the next outbound packet, `None` before packet 0.
    pub fn ack_number(&self) -> Option<u32> {
        self.expected.checked_sub(1)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub async fn receive_file(
    session: &Session,
    sink: &mut ChunkWriter,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let pk = WindowedPacketizer;
    let label = session.label();
    let patience = config.receiver_patience();

    let mut receiver = GbnReceiver::new();
    let mut report = TransferReport::default();

    loop {
        let Some(bytes) = session.recv(patience).await? else {
            log::error!("[gbn {label}] no traffic for {patience:?}, giving up");
            return Err(TransferError::PeerSilent { waited: patience });
        };
        if closing::is_fin(&bytes) {
            log::debug!("[gbn {label}] FIN before TERMINATE; treating transfer as complete");
            session.note_peer_fin();
            break;
        }
        match pk.decode(&bytes) {
            Ok(Packet::Data { seq, payload }) => {
                let accepted = receiver.on_segment(seq);
                if accepted {
                    sink.write_chunk(payload).await?;
                    report.packets += 1;
                    report.bytes += payload.len() as u64;
                }
                if let Some(ack) = receiver.ack_number() {
                    session.send(&pk.make_ack(ack)).await?;
                }
                log::trace!(
                    "[gbn {label}] ← DATA seq={seq} accepted={accepted}; → ACK {:?}",
                    receiver.ack_number()
                );
            }
            Ok(Packet::Terminate) => {
                log::debug!("[gbn {label}] ← TERMINATE after {} packet(s)", report.packets);
                break;
            }
            Ok(Packet::Ack { .. }) => {}
            Err(e) => log::debug!("[gbn {label}] ignoring datagram: {e}"),
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
