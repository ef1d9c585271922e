//! Symmetric four-message teardown run over an established session.
//!
//! ```text
//!   side A                          side B
//!     │ ── FIN ───────────────────────▶ │
//!     │ ◀─────────────────────── FIN ── │   (either order)
//!     │ ── ACKFIN ────────────────────▶ │
//!     │ ◀──────────────────── ACKFIN ── │
//! ```
//!
//! Each side is done once it has seen the peer's `FIN` and had its own
//! `FIN` acknowledged. Leftover data-phase traffic (late ACKs, duplicate
//! DATA) is drained and discarded. After finishing, a side lingers for two
//! timeouts answering repeated `FIN`s, so a lost final `ACKFIN` does not
//! push the peer into a failed close.

use tokio::time::Instant;

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::session::Session;

pub const FIN: &[u8] = b"FIN";
pub const ACKFIN: &[u8] = b"ACKFIN";

pub fn is_fin(bytes: &[u8]) -> bool {
    bytes == FIN
}

/// Run the exchange on `session`. Called once, from [`Session::close`].
pub(crate) async fn negotiate(session: &Session, config: &TransferConfig) -> Result<()> {
    let label = session.label();
    let mut peer_fin = session.peer_fin_seen();
    if peer_fin {
        session.send(ACKFIN).await?;
    }
    session.send(FIN).await?;
    log::debug!("[close {label}] FIN sent (peer FIN already seen: {peer_fin})");

    let mut fin_acked = false;
    let mut attempts = 0u32;
    let mut deadline = Instant::now() + config.timeout;

    while !(peer_fin && fin_acked) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let received = if remaining.is_zero() {
            None
        } else {
            session.recv(remaining).await?
        };
        match received {
            Some(bytes) if is_fin(&bytes) => {
                peer_fin = true;
                session.send(ACKFIN).await?;
                log::debug!("[close {label}] peer FIN, ACKFIN sent");
            }
            Some(bytes) if bytes == ACKFIN => {
                fin_acked = true;
                log::debug!("[close {label}] our FIN acknowledged");
            }
            Some(bytes) => {
                log::debug!("[close {label}] draining {} byte(s) of leftover traffic", bytes.len());
            }
            None => {
                attempts += 1;
                if attempts >= config.max_retries {
                    log::warn!(
                        "[close {label}] giving up after {attempts} attempt(s) \
                         (peer FIN: {peer_fin}, FIN acked: {fin_acked})"
                    );
                    return Err(TransferError::CloseIncomplete { attempts });
                }
                if !fin_acked {
                    session.send(FIN).await?;
                    log::debug!("[close {label}] FIN resent (attempt {})", attempts + 1);
                }
                deadline = Instant::now() + config.timeout;
            }
        }
    }

    linger(session, config).await;
    log::debug!("[close {label}] closed cleanly");
    Ok(())
}

/// Keep answering `FIN` with `ACKFIN` for two timeouts.
async fn linger(session: &Session, config: &TransferConfig) {
    let until = Instant::now() + config.timeout * 2;
    loop {
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        match session.recv(remaining).await {
            Ok(Some(bytes)) if is_fin(&bytes) => {
                if session.send(ACKFIN).await.is_err() {
                    return;
                }
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return,
        }
    }
}
