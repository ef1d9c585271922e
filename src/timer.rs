//! Per-packet retransmission timers.
//!
//! The Selective-Repeat sender keeps one independent timer for every
//! outstanding sequence number. Each timer is a spawned task that sleeps,
//! checks whether its packet is still unacknowledged and resends it.
//! [`TimerTable`] owns the task handles:
//! - [`TimerTable::arm`] starts (or replaces) the timer for one seq.
//! - [`TimerTable::cancel`] stops it when the ACK arrives.
//! - [`TimerTable::close`] stops everything and refuses later arms, so no
//!   timer can fire after the sender has finished.
//!
//! ```text
//!   arm(seq) ──spawn──▶ [ sleep(timeout) ─▶ still outstanding? ─yes─▶ resend ─┐ ]
//!                       [      ▲                    │ no                     │ ]
//!                       [      └────────────────────┼────────────────────────┘ ]
//!   cancel(seq) ─abort─▶                          exit
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Inner {
    handles: HashMap<u32, JoinHandle<()>>,
    closed: bool,
}

/// Timer tasks keyed by sequence number.
#[derive(Debug, Default)]
pub struct TimerTable {
    inner: Mutex<Inner>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` as the timer for `seq`, aborting any previous one.
    ///
    /// Does nothing once the table is closed.
    pub fn arm<F>(&self, seq: u32, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().expect("timer table poisoned");
        if inner.closed {
            return;
        }
        let handle = tokio::spawn(task);
        if let Some(old) = inner.handles.insert(seq, handle) {
            old.abort();
        }
    }

    /// Stop the timer for `seq`. Returns whether one was armed.
    pub fn cancel(&self, seq: u32) -> bool {
        let handle = self
            .inner
            .lock()
            .expect("timer table poisoned")
            .handles
            .remove(&seq);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Timers still registered (finished tasks included until cancelled).
    pub fn armed(&self) -> usize {
        self.inner.lock().expect("timer table poisoned").handles.len()
    }

    /// Abort every timer and refuse further arms.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("timer table poisoned");
        inner.closed = true;
        for (_, handle) in inner.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            for (_, handle) in inner.handles.drain() {
                handle.abort();
            }
        }
    }
}
