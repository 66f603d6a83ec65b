//! Per-instance driver counters.

use core::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        /// Live counters, updated by the workers and `transmit` callers.
        #[derive(Debug, Default)]
        pub struct NetStats {
            $($(#[$doc])* pub $name: AtomicU64,)*
        }

        /// Point-in-time copy of [`NetStats`].
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $($(#[$doc])* pub $name: u64,)*
        }

        impl NetStats {
            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    /// Frames handed to the client.
    rx_frames,
    rx_bytes,
    /// Receive requests posted by fill.
    rx_posted,
    /// Fill passes cut short by page allocation failure.
    rx_alloc_failures,
    /// Receive posts refused by the ring.
    rx_post_rejects,
    /// Fill passes triggered by drain.
    rx_refills,
    tx_submitted,
    tx_bytes,
    /// Transmits refused for lack of ring space.
    tx_no_room,
    /// Transmit requests reclaimed.
    tx_reclaimed,
    /// Transmit doorbells.
    tx_kicks,
}

impl NetStats {
    pub const fn new() -> Self {
        Self {
            rx_frames: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            rx_posted: AtomicU64::new(0),
            rx_alloc_failures: AtomicU64::new(0),
            rx_post_rejects: AtomicU64::new(0),
            rx_refills: AtomicU64::new(0),
            tx_submitted: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            tx_no_room: AtomicU64::new(0),
            tx_reclaimed: AtomicU64::new(0),
            tx_kicks: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn inc(counter: &AtomicU64) {
        Self::add(counter, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = NetStats::new();
        NetStats::inc(&stats.rx_frames);
        NetStats::add(&stats.rx_bytes, 60);
        NetStats::inc(&stats.tx_kicks);
        let snap = stats.snapshot();
        assert_eq!(snap.rx_frames, 1);
        assert_eq!(snap.rx_bytes, 60);
        assert_eq!(snap.tx_kicks, 1);
        assert_eq!(snap.tx_reclaimed, 0);
    }
}
