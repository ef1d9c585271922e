//! Session lifecycle states.
//!
//! ```text
//!   OPEN ──close() or peer FIN──▶ CLOSING ──exchange done / abandoned──▶ CLOSED
//! ```
//!
//! Every session walks this path exactly once; `CLOSED` is terminal and the
//! socket is released on entry.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Handshake done; data may flow.
    #[default]
    Open,
    /// A FIN was sent or received; only closing traffic is meaningful.
    Closing,
    /// Socket released.
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal step.
    pub fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!((self, next), (Open, Closing) | (Open, Closed) | (Closing, Closed))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
