//! Concurrent-stream limiting.

use std::sync::atomic::{AtomicU32, Ordering};

/// Sentinel limit value that disables limiting. Larger than any possible
/// stream count, since stream ids are 31 bits.
pub const NO_STREAM_LIMIT: u32 = 0x8000_0000;

/// Bounds the number of concurrently active streams in one direction.
///
/// Admission is gated by [`StreamLimit::add`]; every admitted stream must
/// eventually call [`StreamLimit::release`]. Lowering the limit never tears
/// down existing streams; it only applies to future admissions.
#[derive(Debug)]
pub struct StreamLimit {
    limit: AtomicU32,
    current: AtomicU32,
}

impl StreamLimit {
    pub fn new(limit: u32) -> Self {
        StreamLimit {
            limit: AtomicU32::new(limit),
            current: AtomicU32::new(0),
        }
    }

    /// Replace the limit. Applies only to future admissions.
    pub fn set_limit(&self, limit: u32) {
        self.limit.store(limit, Ordering::SeqCst);
    }

    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::SeqCst)
    }

    /// Number of currently admitted streams.
    pub fn current(&self) -> u32 {
        self.current.load(Ordering::SeqCst)
    }

    /// Try to admit a new stream.
    pub fn add(&self) -> bool {
        loop {
            let current = self.current.load(Ordering::SeqCst);
            if current >= self.limit.load(Ordering::SeqCst) {
                return false;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Release a previously admitted stream's slot.
    pub fn release(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_admission() {
        let limit = StreamLimit::new(2);
        assert!(limit.add());
        assert!(limit.add());
        assert!(!limit.add());

        limit.release();
        assert!(limit.add());
        assert_eq!(limit.current(), 2);
    }

    #[test]
    fn test_limit_zero_refuses_everything() {
        let limit = StreamLimit::new(0);
        assert!(!limit.add());
    }

    #[test]
    fn test_no_stream_limit_sentinel() {
        let limit = StreamLimit::new(NO_STREAM_LIMIT);
        for _ in 0..10_000 {
            assert!(limit.add());
        }
    }

    #[test]
    fn test_lowering_limit_is_not_retroactive() {
        let limit = StreamLimit::new(4);
        for _ in 0..4 {
            assert!(limit.add());
        }
        limit.set_limit(1);
        // Existing admissions stand; new ones are refused.
        assert_eq!(limit.current(), 4);
        assert!(!limit.add());

        for _ in 0..4 {
            limit.release();
        }
        assert!(limit.add());
        assert!(!limit.add());
    }

    #[test]
    fn test_concurrent_admission_respects_limit() {
        use std::sync::Arc;

        let limit = Arc::new(StreamLimit::new(50));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limit = limit.clone();
            handles.push(std::thread::spawn(move || {
                let mut admitted = 0u32;
                for _ in 0..100 {
                    if limit.add() {
                        admitted += 1;
                    }
                }
                admitted
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50);
        assert_eq!(limit.current(), 50);
    }
}
