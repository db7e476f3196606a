//! Byte-budgeted FIFO store of captured packets.
//!
//! The buffer never rejects an insert. Instead the oldest packets are
//! evicted until the new one fits, so the sum of retained raw bytes stays
//! within the budget after every [`CaptureBuffer::add`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::packet::CapturedPacket;

/// Default capture budget (10 MiB).
pub const DEFAULT_CAPTURE_LIMIT: usize = 10 * 1024 * 1024;

/// Initial slot reservation; storage grows geometrically past this.
const INITIAL_CAPACITY: usize = 1000;

/// Point-in-time buffer statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferStats {
    /// Packets currently retained.
    pub packets: usize,
    /// Raw bytes currently retained.
    pub bytes: usize,
    /// `100 * bytes / budget`, or 0 for a zero budget.
    pub usage_percent: f64,
}

#[derive(Debug)]
struct Inner {
    packets: VecDeque<Arc<CapturedPacket>>,
    current_bytes: usize,
    max_bytes: usize,
}

impl Inner {
    // Callers already hold the lock; this must not take it again.
    fn usage_percent(&self) -> f64 {
        if self.max_bytes == 0 {
            return 0.0;
        }
        self.current_bytes as f64 * 100.0 / self.max_bytes as f64
    }
}

/// Thread-safe capture buffer for one proxy instance.
#[derive(Debug)]
pub struct CaptureBuffer {
    inner: Mutex<Inner>,
}

impl CaptureBuffer {
    /// Create a buffer with the given byte budget. A zero budget selects
    /// [`DEFAULT_CAPTURE_LIMIT`].
    pub fn new(max_bytes: usize) -> Self {
        let max_bytes = if max_bytes == 0 {
            DEFAULT_CAPTURE_LIMIT
        } else {
            max_bytes
        };

        Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::with_capacity(INITIAL_CAPACITY),
                current_bytes: 0,
                max_bytes,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves Inner consistent, so a panic in
        // another holder does not invalidate it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a packet, evicting the oldest packets until it fits.
    ///
    /// A packet larger than the whole budget is truncated to the budget.
    pub fn add(&self, mut packet: CapturedPacket) {
        let mut inner = self.lock();

        if packet.raw.len() > inner.max_bytes {
            packet.raw.truncate(inner.max_bytes);
        }
        let size = packet.raw.len();

        while inner.current_bytes + size > inner.max_bytes {
            let Some(evicted) = inner.packets.pop_front() else {
                break;
            };
            inner.current_bytes -= evicted.raw.len();
        }

        inner.packets.push_back(Arc::new(packet));
        inner.current_bytes += size;
    }

    /// Snapshot of all retained packets, oldest first.
    pub fn get_all(&self) -> Vec<Arc<CapturedPacket>> {
        self.lock().packets.iter().cloned().collect()
    }

    /// Drop every packet and reset usage.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.packets.clear();
        inner.packets.shrink_to(INITIAL_CAPACITY);
        inner.current_bytes = 0;
    }

    pub fn usage_percent(&self) -> f64 {
        self.lock().usage_percent()
    }

    /// Count, bytes and usage under a single lock acquisition.
    pub fn stats(&self) -> BufferStats {
        let inner = self.lock();
        BufferStats {
            packets: inner.packets.len(),
            bytes: inner.current_bytes,
            usage_percent: inner.usage_percent(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    pub fn max_bytes(&self) -> usize {
        self.lock().max_bytes
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Direction;

    fn packet(fill: u8, len: usize) -> CapturedPacket {
        CapturedPacket::from_chunk(Direction::ClientToServer, &vec![fill; len])
    }

    #[test]
    fn zero_limit_uses_default() {
        assert_eq!(CaptureBuffer::new(0).max_bytes(), DEFAULT_CAPTURE_LIMIT);
        assert_eq!(CaptureBuffer::default().max_bytes(), DEFAULT_CAPTURE_LIMIT);
    }

    #[test]
    fn add_and_stats() {
        let buffer = CaptureBuffer::new(100);
        buffer.add(packet(b'a', 10));
        buffer.add(packet(b'b', 15));

        let stats = buffer.stats();
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.bytes, 25);
        assert!((stats.usage_percent - 25.0).abs() < f64::EPSILON);
        assert!((buffer.usage_percent() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn evicts_oldest_first() {
        let buffer = CaptureBuffer::new(20);
        buffer.add(packet(1, 10));
        buffer.add(packet(2, 10));
        buffer.add(packet(3, 10));

        let packets = buffer.get_all();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].raw()[0], 2);
        assert_eq!(packets[1].raw()[0], 3);
        assert_eq!(buffer.stats().bytes, 20);
    }

    #[test]
    fn evicts_several_to_fit_large_packet() {
        let buffer = CaptureBuffer::new(30);
        buffer.add(packet(1, 10));
        buffer.add(packet(2, 10));
        buffer.add(packet(3, 10));
        buffer.add(packet(4, 25));

        let packets = buffer.get_all();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].raw()[0], 4);
        assert_eq!(buffer.stats().bytes, 25);
    }

    #[test]
    fn oversized_packet_is_truncated() {
        let buffer = CaptureBuffer::new(8);
        buffer.add(packet(1, 4));
        buffer.add(packet(9, 50));

        let packets = buffer.get_all();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].raw_len(), 8);
        // Reported chunk length is the original read size.
        assert_eq!(packets[0].bytes, 50);
        assert_eq!(buffer.stats().bytes, 8);
        assert!((buffer.usage_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let buffer = CaptureBuffer::new(1_000_000);
        for _ in 0..(INITIAL_CAPACITY * 3) {
            buffer.add(packet(0, 1));
        }
        assert_eq!(buffer.len(), INITIAL_CAPACITY * 3);
        assert_eq!(buffer.stats().bytes, INITIAL_CAPACITY * 3);
    }

    #[test]
    fn clear_resets() {
        let buffer = CaptureBuffer::new(100);
        buffer.add(packet(1, 10));
        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.get_all().is_empty());
        let stats = buffer.stats();
        assert_eq!(stats.packets, 0);
        assert_eq!(stats.bytes, 0);

        buffer.add(packet(2, 10));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn snapshot_is_detached() {
        let buffer = CaptureBuffer::new(100);
        buffer.add(packet(1, 10));
        let snapshot = buffer.get_all();
        buffer.clear();
        assert_eq!(snapshot.len(), 1);
    }
}
