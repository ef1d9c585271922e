//! Stop-and-Wait receiving engine.
//!
//! Keeps one expected bit. A DATA packet carrying it is written and the bit
//! flips; any other DATA is a duplicate whose payload is dropped. Every
//! DATA is acknowledged with its *own* sequence so a sender whose ACK was
//! lost gets the one it is waiting for.
//!
//! The loop ends on TERMINATE, or on a `FIN` (the sender finished and its
//! TERMINATE was lost).

use crate::chunks::ChunkWriter;
use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::packet::{Packet, Packetizer, StopAndWaitPacketizer};
use crate::session::Session;
use crate::transfer::TransferReport;

pub async fn receive_file(
    session: &Session,
    sink: &mut ChunkWriter,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let pk = StopAndWaitPacketizer;
    let label = session.label();
    let patience = config.receiver_patience();

    let mut report = TransferReport::default();
    let mut expected = 0u32;

    loop {
        let Some(bytes) = session.recv(patience).await? else {
            log::error!("[sw {label}] no traffic for {patience:?}, giving up");
            return Err(TransferError::PeerSilent { waited: patience });
        };
        if closing::is_fin(&bytes) {
            log::debug!("[sw {label}] FIN before TERMINATE; treating transfer as complete");
            session.note_peer_fin();
            break;
        }
        match pk.decode(&bytes) {
            Ok(Packet::Data { seq, payload }) => {
                if seq == expected {
                    sink.write_chunk(payload).await?;
                    report.packets += 1;
                    report.bytes += payload.len() as u64;
                    expected ^= 1;
                    log::trace!("[sw {label}] ← DATA seq={seq} len={}", payload.len());
                } else {
                    log::debug!("[sw {label}] duplicate DATA seq={seq}, re-acking");
                }
                session.send(&pk.make_ack(seq)).await?;
            }
            Ok(Packet::Terminate) => {
                log::debug!("[sw {label}] ← TERMINATE after {} packet(s)", report.packets);
                break;
            }
            Ok(Packet::Ack { .. }) => {}
            Err(e) => log::debug!("[sw {label}] ignoring datagram: {e}"),
        }
    }

    Ok(report)
}
