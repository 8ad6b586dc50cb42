//! Dataplane counters
//!
//! Relaxed atomic counters on the packet path, read out as a plain snapshot.
//! Readers may observe slightly stale values; exact counting is not a
//! contract.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free dataplane counters
#[derive(Debug, Default)]
pub struct DataplaneStats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    dropped: AtomicU64,
    flooded: AtomicU64,
    link_down_drops: AtomicU64,
    pool_exhausted: AtomicU64,
    app_errors: AtomicU64,
}

impl DataplaneStats {
    /// Count one received frame
    #[inline(always)]
    pub fn record_rx(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count one transmitted frame
    #[inline(always)]
    pub fn record_tx(&self, bytes: u64) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count one discarded packet
    #[inline(always)]
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one flood replication
    #[inline(always)]
    pub fn record_flood(&self) {
        self.flooded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one egress attempt on a downed link
    #[inline(always)]
    pub fn record_link_down(&self) {
        self.link_down_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed allocation on an empty pool
    #[inline(always)]
    pub fn record_pool_exhausted(&self) {
        self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one error surfaced from the application
    #[inline(always)]
    pub fn record_app_error(&self) {
        self.app_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter at once
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            flooded: self.flooded.load(Ordering::Relaxed),
            link_down_drops: self.link_down_drops.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            app_errors: self.app_errors.load(Ordering::Relaxed),
        }
    }
}

/// Non-atomic view of the counters at one instant
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    /// Frames received
    pub rx_packets: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Frames transmitted
    pub tx_packets: u64,
    /// Bytes transmitted
    pub tx_bytes: u64,
    /// Packets discarded
    pub dropped: u64,
    /// Flood replications
    pub flooded: u64,
    /// Egress attempts on downed links
    pub link_down_drops: u64,
    /// Failed allocations on an empty pool
    pub pool_exhausted: u64,
    /// Errors surfaced from the application
    pub app_errors: u64,
}
