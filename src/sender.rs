//! Stop-and-Wait sending engine.
//!
//! The engine is split in two:
//! - [`transition`] is a pure state machine over [`SwState`] / [`SwEvent`]
//!   that decides what to do next, and
//! - [`send_file`] drives it: it reads chunks, performs the chosen
//!   [`SwAction`] on the session and turns the wire into events.
//!
//! ```text
//!   Idle ──▶ Sending ──chunk──▶ WaitingAck ──ACK(seq)──▶ Sending
//!               │                 │   ▲                     (seq flipped)
//!               │ exhausted       │   └─ timeout / stale ACK: resend
//!               ▼                 ▼
//!           Completed          give up after `retransmission_limit`
//!           (TERMINATE)
//! ```
//!
//! At most one DATA packet is in flight. The sequence field alternates
//! between 0 and 1.

use tokio::time::Instant;

use crate::chunks::ChunkReader;
use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::packet::{Packet, Packetizer, StopAndWaitPacketizer};
use crate::session::Session;
use crate::transfer::TransferReport;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwState {
    Idle,
    Sending,
    /// `retries` counts retransmissions caused by timeouts.
    WaitingAck { retries: u32 },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwEvent {
    Start,
    ChunkReady,
    SourceExhausted,
    Ack(u32),
    Timeout,
    /// Anything that is not an ACK.
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwAction {
    None,
    Transmit,
    Retransmit,
    FlipSequence,
    SendTerminate,
    GiveUp,
}

/// Next state and action for `event`, with `seq` the bit currently in flight.
pub fn transition(state: SwState, seq: u32, event: SwEvent, limit: u32) -> (SwState, SwAction) {
    use SwAction as A;
    use SwEvent as E;
    use SwState as S;

    match (state, event) {
        (S::Idle, E::Start) => (S::Sending, A::None),
        (S::Sending, E::ChunkReady) => (S::WaitingAck { retries: 0 }, A::Transmit),
        (S::Sending, E::SourceExhausted) => (S::Completed, A::SendTerminate),
        (S::WaitingAck { .. }, E::Ack(acked)) if acked == seq => (S::Sending, A::FlipSequence),
        (S::WaitingAck { retries }, E::Ack(_)) => (S::WaitingAck { retries }, A::Retransmit),
        (S::WaitingAck { retries }, E::Timeout) if retries >= limit => {
            (S::WaitingAck { retries }, A::GiveUp)
        }
        (S::WaitingAck { retries }, E::Timeout) => {
            (S::WaitingAck { retries: retries + 1 }, A::Retransmit)
        }
        (other, _) => (other, A::None),
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Send every chunk of `source` over `session`, then TERMINATE.
pub async fn send_file(
    session: &Session,
    mut source: ChunkReader,
    config: &TransferConfig,
) -> Result<TransferReport> {
    let pk = StopAndWaitPacketizer;
    let label = session.label();
    let limit = config.retransmission_limit;

    let mut report = TransferReport::default();
    let mut state = SwState::Idle;
    let mut event = SwEvent::Start;
    let mut seq = 0u32;
    let mut current = Vec::new();
    let mut deadline = Instant::now();

    loop {
        let (next, action) = transition(state, seq, event, limit);
        state = next;

        match action {
            SwAction::None => {}
            SwAction::Transmit => {
                session.send(&current).await?;
                report.packets += 1;
                deadline = Instant::now() + config.timeout;
                log::debug!("[sw {label}] → DATA seq={seq} len={}", current.len() - 2);
            }
            SwAction::Retransmit => {
                session.send(&current).await?;
                report.retransmissions += 1;
                deadline = Instant::now() + config.timeout;
                log::debug!("[sw {label}] ↻ DATA seq={seq} ({event:?})");
            }
            SwAction::FlipSequence => {
                log::trace!("[sw {label}] ← ACK seq={seq}");
                seq ^= 1;
            }
            SwAction::SendTerminate => {
                session.send(&pk.make_terminate()).await?;
                log::debug!("[sw {label}] → TERMINATE after {} packet(s)", report.packets);
            }
            SwAction::GiveUp => {
                log::error!("[sw {label}] seq={seq} unacknowledged after {limit} retransmission(s)");
                return Err(TransferError::RetriesExhausted { seq, attempts: limit });
            }
        }

        event = match state {
            SwState::Idle => SwEvent::Start,
            SwState::Sending => match source.next_chunk().await? {
                Some(chunk) => {
                    report.bytes += chunk.len() as u64;
                    current = pk.make_data(seq, &chunk);
                    SwEvent::ChunkReady
                }
                None => SwEvent::SourceExhausted,
            },
            SwState::WaitingAck { .. } => next_event(session, &pk, deadline).await?,
            SwState::Completed => break,
        };
    }

    Ok(report)
}

/// Wait until `deadline` for something that matters to the state machine.
async fn next_event(
    session: &Session,
    pk: &StopAndWaitPacketizer,
    deadline: Instant,
) -> Result<SwEvent> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Ok(SwEvent::Timeout);
    }
    let Some(bytes) = session.recv(remaining).await? else {
        return Ok(SwEvent::Timeout);
    };
    if closing::is_fin(&bytes) {
        session.note_peer_fin();
        return Err(TransferError::PeerClosed);
    }
    Ok(match pk.decode(&bytes) {
        Ok(Packet::Ack { seq }) => SwEvent::Ack(seq),
        _ => SwEvent::Unrelated,
    })
}
