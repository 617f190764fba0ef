//! The channel engine: receive loop, send queue and close classification.
//!
//! An engine owns one connected socket. The receive path arms one read at a
//! time and hands each filled window to the [`ChannelHandler`] as a
//! [`ReceiveLease`]; the next read is armed only after the lease is given
//! back with [`ReceiveLease::proceed`]. The send path appends to a FIFO under
//! a lock and keeps at most one flush task alive. Every termination goes
//! through a single compare-and-swap so the handler sees exactly one
//! `closed` call.

mod engine;
mod receiver;
mod sender;

use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::cause::CloseCause;

pub use engine::ChannelEngine;
pub use receiver::ReceiveLease;

/// Callbacks the engine invokes. Injected at construction.
///
/// Both methods run on a Tokio worker thread with no engine lock held, so
/// they may call back into the engine (including `close`).
pub trait ChannelHandler: Send + Sync + 'static {
    /// A receive completed with data. The receive path stays idle until
    /// `lease.proceed()` is called.
    fn bytes_received(&self, lease: ReceiveLease);

    /// The channel terminated. Called exactly once.
    fn closed(&self, cause: &CloseCause);
}

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    /// Constructed, receive path not armed yet.
    Created,

    /// Receive path armed; sends flow.
    Started,

    /// Termination won; resources are being released.
    Closing,

    /// Terminal.
    Closed,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Created,
            1 => ChannelState::Started,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// Atomic holder for [`ChannelState`].
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ChannelState::Created as u8))
    }

    fn load(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Created -> Started`. Returns the observed state on failure.
    fn try_start(&self) -> Result<(), ChannelState> {
        self.0
            .compare_exchange(
                ChannelState::Created as u8,
                ChannelState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(ChannelState::from_u8)
    }

    /// `Created | Started -> Closing`. Only one caller ever gets `true`.
    fn begin_closing(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current >= ChannelState::Closing as u8 {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                ChannelState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn finish_closing(&self) {
        self.0.store(ChannelState::Closed as u8, Ordering::Release);
    }
}

/// Statistics about channel operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    /// Bytes delivered by receive completions.
    pub bytes_received: u64,

    /// Bytes written to the socket.
    pub bytes_sent: u64,

    /// Receive completions that carried data.
    pub receives: u64,

    /// Completed socket writes (one per coalesced batch).
    pub sends: u64,

    /// `send` calls rejected because the queue bound was hit.
    pub rejected_sends: u64,

    /// Bytes accepted by `send` but not yet written.
    pub pending_send_bytes: usize,
}

#[derive(Debug, Default)]
struct StatsCounters {
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    receives: AtomicU64,
    sends: AtomicU64,
    rejected_sends: AtomicU64,
}

impl StatsCounters {
    fn record_receive(&self, len: usize) {
        self.receives.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_send(&self, len: usize) {
        self.sends.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_rejected(&self) {
        self.rejected_sends.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, pending_send_bytes: usize) -> ChannelStats {
        ChannelStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            receives: self.receives.load(Ordering::Relaxed),
            sends: self.sends.load(Ordering::Relaxed),
            rejected_sends: self.rejected_sends.load(Ordering::Relaxed),
            pending_send_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), ChannelState::Created);
        assert!(cell.try_start().is_ok());
        assert_eq!(cell.try_start(), Err(ChannelState::Started));

        assert!(cell.begin_closing());
        assert!(!cell.begin_closing());
        assert_eq!(cell.load(), ChannelState::Closing);

        cell.finish_closing();
        assert_eq!(cell.load(), ChannelState::Closed);
        assert!(!cell.begin_closing());
        assert_eq!(cell.try_start(), Err(ChannelState::Closed));
    }

    #[test]
    fn test_close_before_start() {
        let cell = StateCell::new();
        assert!(cell.begin_closing());
        assert_eq!(cell.try_start(), Err(ChannelState::Closing));
    }

    #[test]
    fn test_stats_snapshot() {
        let counters = StatsCounters::default();
        counters.record_receive(10);
        counters.record_receive(5);
        counters.record_send(7);
        counters.record_rejected();

        let stats = counters.snapshot(3);
        assert_eq!(stats.receives, 2);
        assert_eq!(stats.bytes_received, 15);
        assert_eq!(stats.sends, 1);
        assert_eq!(stats.bytes_sent, 7);
        assert_eq!(stats.rejected_sends, 1);
        assert_eq!(stats.pending_send_bytes, 3);
    }
}
