//! Monotonic nanosecond message-timestamp ids.
//!
//! Chat messages are ordered within a room by a nanosecond wall-clock
//! timestamp assigned by the edge server that persists them. A naive
//! `SystemTime::now()` can regress (NTP step, VM migration) or collide under
//! load; both would violate the "strictly increasing per room per ES"
//! invariant, so every allocator enforces `next = max(now_ns, last + 1)`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Issues strictly increasing nanosecond timestamp ids for one edge server.
#[derive(Debug, Default)]
pub struct IdAllocator {
    last_issued: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            last_issued: AtomicU64::new(0),
        }
    }

    /// Allocate the next id, guaranteed strictly greater than every id
    /// previously returned by this allocator.
    pub fn next_id(&self) -> u64 {
        self.next_id_at(now_ns())
    }

    fn next_id_at(&self, now_ns: u64) -> u64 {
        let mut last = self.last_issued.load(Ordering::Relaxed);
        loop {
            let candidate = now_ns.max(last + 1);
            match self.last_issued.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase_even_under_clock_regression() {
        let alloc = IdAllocator::new();
        let a = alloc.next_id_at(1_000);
        let b = alloc.next_id_at(500); // clock went backwards
        let c = alloc.next_id_at(500); // same regressed reading again
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn ids_track_wall_clock_when_it_advances_normally() {
        let alloc = IdAllocator::new();
        let a = alloc.next_id_at(1_000);
        let b = alloc.next_id_at(5_000);
        assert_eq!(a, 1_000);
        assert_eq!(b, 5_000);
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        use std::sync::Arc;
        let alloc = Arc::new(IdAllocator::new());
        let mut ids: Vec<u64> = (0..200).map(|_| alloc.next_id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
    }
}
