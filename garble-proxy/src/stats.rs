use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use crate::Direction;

#[derive(Debug, Default)]
struct DirectionCounters {
    /// Total payload bytes relayed. Counts each chunk once, regardless of
    /// how many copies were written.
    bytes: AtomicU64,
    /// Chunks relayed.
    chunks: AtomicU64,
    /// Chunks dropped.
    drops: AtomicU64,
}

/// Statistics for a running proxy.
/// These are shared between the forwarder tasks and any reporting consumer.
#[derive(Debug)]
pub struct ProxyStats {
    request: DirectionCounters,
    response: DirectionCounters,
    /// Currently open client connections.
    active_connections: AtomicUsize,
    /// When the proxy was created, for rate computations.
    started_at: Instant,
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self {
            request: DirectionCounters::default(),
            response: DirectionCounters::default(),
            active_connections: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }
}

impl ProxyStats {
    fn counters(&self, direction: Direction) -> &DirectionCounters {
        match direction {
            Direction::Request => &self.request,
            Direction::Response => &self.response,
        }
    }

    #[inline]
    pub(crate) fn record_bytes(&self, direction: Direction, count: u64) {
        let counters = self.counters(direction);
        counters.bytes.fetch_add(count, Ordering::Relaxed);
        counters.chunks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_drop(&self, direction: Direction) {
        self.counters(direction).drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Total payload bytes relayed in the given direction.
    #[inline]
    pub fn bytes(&self, direction: Direction) -> u64 {
        self.counters(direction).bytes.load(Ordering::Relaxed)
    }

    /// Chunks relayed in the given direction.
    #[inline]
    pub fn chunks(&self, direction: Direction) -> u64 {
        self.counters(direction).chunks.load(Ordering::Relaxed)
    }

    /// Chunks dropped in the given direction.
    #[inline]
    pub fn drops(&self, direction: Direction) -> u64 {
        self.counters(direction).drops.load(Ordering::Relaxed)
    }

    /// Chunks dropped across both directions.
    #[inline]
    pub fn total_drops(&self) -> u64 {
        self.drops(Direction::Request) + self.drops(Direction::Response)
    }

    /// Currently open client connections.
    #[inline]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Time elapsed since the proxy was created.
    #[inline]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average relay throughput for the given direction, in bytes per
    /// second over the whole uptime.
    pub fn rate(&self, direction: Direction) -> f64 {
        let elapsed = self.uptime().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes(direction) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Fraction of chunks dropped across both directions, in [0, 1].
    pub fn loss_ratio(&self) -> f64 {
        let drops = self.total_drops();
        let seen = drops + self.chunks(Direction::Request) + self.chunks(Direction::Response);
        if seen > 0 {
            drops as f64 / seen as f64
        } else {
            0.0
        }
    }
}
