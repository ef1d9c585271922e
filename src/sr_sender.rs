//! Selective-Repeat sending engine.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────── Arc<Shared> ──────────────┐
//!   run() ──fill──▶  Mutex<Window>   TimerTable   Notify    │
//!     │           └────▲───────────────▲────────────▲───────┘
//!     │                │               │            │
//!     │      ack loop task ──ACK──▶ mark/advance ──▶ fill ──▶ session.send
//!     │                                │
//!     │      timer task per seq ───────┴── still outstanding? resend
//!     ▼
//!   wait for `finished`, then TERMINATE
//! ```
//!
//! Locking rule: the window mutex is only held for bookkeeping and never
//! across an `.await`. A sequence number is claimed under the lock, then
//! sent and armed outside it, so the send path and the ACK path can never
//! transmit the same new packet twice.
//!
//! Only the ACK path refills the window after the initial burst.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::closing;
use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::packet::{Packet, Packetizer, WindowedPacketizer};
use crate::session::Session;
use crate::sr_window::{Window, WindowSnapshot};
use crate::timer::TimerTable;
use crate::transfer::TransferReport;

struct Shared {
    session: Arc<Session>,
    config: TransferConfig,
    /// Encoded DATA packets; index is the sequence number.
    packets: Vec<Vec<u8>>,
    bytes: u64,
    window: Mutex<Window>,
    timers: TimerTable,
    running: AtomicBool,
    finished: Notify,
    failure: Mutex<Option<TransferError>>,
    retransmissions: AtomicU64,
}

impl Shared {
    fn label(&self) -> &str {
        self.session.label()
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record the first failure and wake `run`.
    fn fail(&self, err: TransferError) {
        {
            let mut slot = self.failure.lock().expect("failure slot poisoned");
            if slot.is_none() {
                log::error!("[sr {}] {err}", self.label());
                *slot = Some(err);
            }
        }
        self.running.store(false, Ordering::SeqCst);
        self.finished.notify_one();
    }

    fn complete(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.finished.notify_one();
    }
}

/// One Selective-Repeat upload of an in-memory list of chunks.
pub struct SrSender {
    shared: Arc<Shared>,
}

impl SrSender {
    pub fn new(session: Arc<Session>, chunks: Vec<Vec<u8>>, config: &TransferConfig) -> Result<Self> {
        let total = u32::try_from(chunks.len()).map_err(|_| {
            TransferError::Resource(format!("{} chunks exceed the sequence space", chunks.len()))
        })?;
        let pk = WindowedPacketizer;
        let bytes = chunks.iter().map(|c| c.len() as u64).sum();
        let packets = chunks
            .iter()
            .enumerate()
            .map(|(seq, chunk)| pk.make_data(seq as u32, chunk))
            .collect();
        Ok(Self {
            shared: Arc::new(Shared {
                session,
                config: config.clone(),
                packets,
                bytes,
                window: Mutex::new(Window::new(config.window_size, total)),
                timers: TimerTable::new(),
                running: AtomicBool::new(true),
                finished: Notify::new(),
                failure: Mutex::new(None),
                retransmissions: AtomicU64::new(0),
            }),
        })
    }

    pub fn window(&self) -> WindowSnapshot {
        self.shared.window.lock().expect("window poisoned").snapshot()
    }

    /// Deliver every packet, then send TERMINATE.
    ///
    /// On failure all timers are cancelled and the ACK flow is stopped
    /// before the error is returned.
    pub async fn run(&self) -> Result<TransferReport> {
        let shared = &self.shared;
        let total = shared.packets.len();
        log::info!(
            "[sr {}] sending {total} packet(s), window {}",
            shared.label(),
            shared.config.window_size
        );

        let acks: JoinHandle<()> = tokio::spawn(ack_loop(shared.clone()));
        fill_window(shared).await;
        if shared.window.lock().expect("window poisoned").is_complete() {
            shared.complete();
        }

        shared.finished.notified().await;
        shared.running.store(false, Ordering::SeqCst);
        shared.timers.close();
        acks.abort();

        let failure = shared.failure.lock().expect("failure slot poisoned").take();
        if let Some(err) = failure {
            return Err(err);
        }

        shared.session.send(&WindowedPacketizer.make_terminate()).await?;
        let report = TransferReport {
            packets: total as u64,
            bytes: shared.bytes,
            retransmissions: shared.retransmissions.load(Ordering::SeqCst),
            peak_buffered: 0,
        };
        log::debug!("[sr {}] → TERMINATE ({report})", shared.label());
        Ok(report)
    }
}

/// Claim, send and arm every sequence number the window currently allows.
async fn fill_window(shared: &Arc<Shared>) {
    while shared.running() {
        let claimed = shared.window.lock().expect("window poisoned").claim_next();
        let Some(seq) = claimed else {
            break;
        };
        if let Err(e) = shared.session.send(&shared.packets[seq as usize]).await {
            shared.fail(e);
            return;
        }
        log::trace!("[sr {}] → DATA seq={seq}", shared.label());
        shared.timers.arm(seq, retransmit_loop(shared.clone(), seq));
    }
}

/// Timer body for one packet: resend it every timeout until acknowledged.
async fn retransmit_loop(shared: Arc<Shared>, seq: u32) {
    let limit = shared.config.retransmission_limit;
    let mut attempts = 0u32;
    loop {
        tokio::time::sleep(shared.config.timeout).await;
        if !shared.running() {
            return;
        }
        let outstanding = shared.window.lock().expect("window poisoned").is_outstanding(seq);
        if !outstanding {
            return;
        }
        if attempts >= limit {
            shared.fail(TransferError::RetriesExhausted { seq, attempts });
            return;
        }
        attempts += 1;
        shared.retransmissions.fetch_add(1, Ordering::SeqCst);
        log::debug!("[sr {}] ↻ DATA seq={seq} (attempt {attempts})", shared.label());
        if let Err(e) = shared.session.send(&shared.packets[seq as usize]).await {
            shared.fail(e);
            return;
        }
    }
}

/// Consume ACKs until the window completes or the transfer stops.
async fn ack_loop(shared: Arc<Shared>) {
    let pk = WindowedPacketizer;
    while shared.running() {
        let received = match shared.session.recv(shared.config.timeout).await {
            Ok(received) => received,
            Err(e) => {
                shared.fail(e);
                return;
            }
        };
        let Some(bytes) = received else {
            continue;
        };
        if closing::is_fin(&bytes) {
            shared.session.note_peer_fin();
            shared.fail(TransferError::PeerClosed);
            return;
        }
        let seq = match pk.decode(&bytes) {
            Ok(Packet::Ack { seq }) => seq,
            Ok(other) => {
                log::debug!("[sr {}] ignoring {other:?} while sending", shared.label());
                continue;
            }
            Err(e) => {
                log::debug!("[sr {}] ignoring datagram: {e}", shared.label());
                continue;
            }
        };

        let (fresh, advanced, complete) = {
            let mut window = shared.window.lock().expect("window poisoned");
            let fresh = window.mark_acked(seq);
            let advanced = if fresh { window.advance() } else { 0 };
            (fresh, advanced, window.is_complete())
        };
        if !fresh {
            log::trace!("[sr {}] ← duplicate ACK seq={seq}", shared.label());
            continue;
        }
        shared.timers.cancel(seq);
        log::trace!("[sr {}] ← ACK seq={seq} (base +{advanced})", shared.label());

        if complete {
            shared.complete();
            return;
        }
        if advanced > 0 {
            fill_window(&shared).await;
        }
    }
}
