//! Selective-Repeat send window.
//!
//! [`Window`] is pure bookkeeping: it never touches the socket or timers.
//! The sender keeps it behind a single mutex shared by the send path, the
//! ACK path and the retransmission timers.
//!
//! # Layout
//!
//! ```text
//!   base            next_seq          base + window_size      total
//!    │ acked/unacked   │   sendable          │                   │
//!  ──┼─────────────────┼─────────────────────┼───────────────────┼──▶ seq
//!    │◀─ outstanding ─▶│
//! ```
//!
//! Invariants:
//! - `base <= next_seq <= min(base + window_size, total)`.
//! - `base` only moves forward, and only past contiguous acked entries.
//! - `acked` only holds sequence numbers in `[base, next_seq)`.

use std::collections::BTreeSet;

/// Point-in-time copy of the window's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub base: u32,
    pub next_seq: u32,
    pub total: u32,
    pub acked_ahead: usize,
}

#[derive(Debug)]
pub struct Window {
    base: u32,
    next_seq: u32,
    window_size: u32,
    total: u32,
    acked: BTreeSet<u32>,
}

impl Window {
    /// Window over packets `0..total`. `window_size` must be at least 1.
    pub fn new(window_size: u32, total: u32) -> Self {
        debug_assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 0,
            next_seq: 0,
            window_size: window_size.max(1),
            total,
            acked: BTreeSet::new(),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    fn limit(&self) -> u32 {
        self.base.saturating_add(self.window_size).min(self.total)
    }

    /// `true` when another packet may be sent now.
    pub fn can_send(&self) -> bool {
        self.next_seq < self.limit()
    }

    /// Reserve the next sequence number for transmission.
    pub fn claim_next(&mut self) -> Option<u32> {
        if !self.can_send() {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(seq)
    }

    /// `seq` has been sent and is inside the current window.
    pub fn is_within_window(&self, seq: u32) -> bool {
        self.base <= seq && seq < self.next_seq
    }

    /// Record an ACK. Returns `false` for duplicates and out-of-window seqs.
    pub fn mark_acked(&mut self, seq: u32) -> bool {
        self.is_within_window(seq) && self.acked.insert(seq)
    }

    /// Slide `base` past every contiguous acked entry. Returns how far it moved.
    pub fn advance(&mut self) -> u32 {
        let start = self.base;
        while self.acked.remove(&self.base) {
            self.base += 1;
        }
        self.base - start
    }

    /// Sent and not yet acknowledged.
    pub fn is_outstanding(&self, seq: u32) -> bool {
        self.is_within_window(seq) && !self.acked.contains(&seq)
    }

    pub fn is_complete(&self) -> bool {
        self.base >= self.total
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            base: self.base,
            next_seq: self.next_seq,
            total: self.total,
            acked_ahead: self.acked.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(w: &mut Window) -> Vec<u32> {
        std::iter::from_fn(|| w.claim_next()).collect()
    }

    #[test]
    fn claims_stop_at_window_edge() {
        let mut w = Window::new(4, 10);
        assert_eq!(fill(&mut w), vec![0, 1, 2, 3]);
        assert!(!w.can_send());
        assert_eq!(w.next_seq(), 4);
    }

    #[test]
    fn claims_stop_at_total() {
        let mut w = Window::new(8, 3);
        assert_eq!(fill(&mut w), vec![0, 1, 2]);
    }

    #[test]
    fn out_of_order_ack_holds_base() {
        let mut w = Window::new(4, 10);
        fill(&mut w);
        assert!(w.mark_acked(2));
        assert_eq!(w.advance(), 0);
        assert_eq!(w.base(), 0);
        assert!(w.is_outstanding(0));
        assert!(!w.is_outstanding(2));
    }

    #[test]
    fn base_slides_over_contiguous_acks() {
        let mut w = Window::new(4, 10);
        fill(&mut w);
        w.mark_acked(1);
        w.mark_acked(2);
        w.mark_acked(0);
        assert_eq!(w.advance(), 3);
        assert_eq!(w.base(), 3);
        assert_eq!(fill(&mut w), vec![4, 5, 6]);
        assert_eq!(w.snapshot().acked_ahead, 0);
    }

    #[test]
    fn duplicate_and_foreign_acks_are_rejected() {
        let mut w = Window::new(4, 10);
        fill(&mut w);
        assert!(w.mark_acked(0));
        assert!(!w.mark_acked(0));
        assert!(!w.mark_acked(7), "not yet sent");
        w.advance();
        assert!(!w.mark_acked(0), "behind base");
    }

    #[test]
    fn completes_when_base_reaches_total() {
        let mut w = Window::new(2, 3);
        while !w.is_complete() {
            let sent = fill(&mut w);
            for seq in sent {
                w.mark_acked(seq);
            }
            w.advance();
        }
        assert_eq!(w.snapshot(), WindowSnapshot { base: 3, next_seq: 3, total: 3, acked_ahead: 0 });
    }

    #[test]
    fn empty_transfer_is_complete_immediately() {
        let w = Window::new(4, 0);
        assert!(w.is_complete());
        assert!(!w.can_send());
    }

    #[test]
    fn window_never_exceeds_its_size() {
        let mut w = Window::new(3, 100);
        for round in 0..20u32 {
            fill(&mut w);
            let snap = w.snapshot();
            assert!(snap.next_seq - snap.base <= 3, "round {round}: {snap:?}");
            // ack the newest first to keep base lagging
            w.mark_acked(snap.next_seq - 1);
            w.mark_acked(snap.base);
            w.advance();
        }
    }
}
