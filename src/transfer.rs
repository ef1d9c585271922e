//! Transfer Job: one file moving in one direction over one session.
//!
//! Picks the engine for the [`Protocol`], runs it, and then ends the
//! session: a successful transfer runs the closing exchange, a failed one
//! releases the socket straight away.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::chunks::{ChunkReader, ChunkWriter};
use crate::config::{Protocol, TransferConfig};
use crate::error::Result;
use crate::session::Session;
use crate::sr_sender::SrSender;
use crate::{gbn_receiver, gbn_sender, receiver, sender, sr_receiver};

/// Counters reported by every engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// DATA packets carrying new payload (sent, or written by a receiver).
    pub packets: u64,
    pub bytes: u64,
    /// Sender only.
    pub retransmissions: u64,
    /// Selective-Repeat receiver only: most out-of-order packets held at once.
    pub peak_buffered: u64,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packet(s), {} byte(s), {} retransmission(s)",
            self.packets, self.bytes, self.retransmissions
        )
    }
}

/// Send everything `source` yields, then close `session`.
pub async fn send_file(
    session: Arc<Session>,
    source: ChunkReader,
    protocol: Protocol,
    config: &TransferConfig,
) -> Result<TransferReport> {
    log::info!("[transfer {}] sending with {protocol}", session.label());
    let outcome = run_sender(&session, source, protocol, config).await;
    conclude(&session, outcome, config).await
}

async fn run_sender(
    session: &Arc<Session>,
    source: ChunkReader,
    protocol: Protocol,
    config: &TransferConfig,
) -> Result<TransferReport> {
    match protocol {
        Protocol::StopAndWait => sender::send_file(session, source, config).await,
        Protocol::SelectiveRepeat => {
            let chunks = source.read_all().await?;
            SrSender::new(session.clone(), chunks, config)?.run().await
        }
        Protocol::GoBackN => {
            let chunks = source.read_all().await?;
            gbn_sender::send_file(session, chunks, config).await
        }
    }
}

/// Receive into `dest`, then close `session`.
///
/// `dest` only appears once the whole file has arrived.
pub async fn receive_file(
    session: Arc<Session>,
    dest: &Path,
    protocol: Protocol,
    config: &TransferConfig,
) -> Result<TransferReport> {
    log::info!(
        "[transfer {}] receiving {} with {protocol}",
        session.label(),
        dest.display()
    );
    let outcome = run_receiver(&session, dest, protocol, config).await;
    conclude(&session, outcome, config).await
}

async fn run_receiver(
    session: &Session,
    dest: &Path,
    protocol: Protocol,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let mut sink = ChunkWriter::create(dest).await?;
    let received = match protocol {
        Protocol::StopAndWait => receiver::receive_file(session, &mut sink, config).await,
        Protocol::SelectiveRepeat => sr_receiver::receive_file(session, &mut sink, config).await,
        Protocol::GoBackN => gbn_receiver::receive_file(session, &mut sink, config).await,
    };
    match received {
        Ok(report) => {
            sink.finish().await?;
            Ok(report)
        }
        Err(e) => {
            sink.abandon().await;
            Err(e)
        }
    }
}

async fn conclude(
    session: &Session,
    outcome: Result<TransferReport>,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let label = session.label();
    match outcome {
        Ok(report) => {
            if let Err(e) = session.close(config).await {
                log::warn!("[transfer {label}] {e}; socket released anyway");
            }
            log::info!("[transfer {label}] done: {report}");
            Ok(report)
        }
        Err(e) => {
            session.abort();
            log::error!("[transfer {label}] failed: {e}");
            Err(e)
        }
    }
}
