//! # Nonce Sources
//!
//! The ledger rejects any `(subject, nonce)` pair it has seen. Raw wall-clock
//! milliseconds collide when two attestations are built in the same
//! millisecond, so neither source here returns the clock directly.

use std::sync::atomic::{AtomicU64, Ordering};

use agx_core::Hash32;
use rand_core::RngCore;

/// Produces nonces for attestation payloads.
pub trait NonceSource: Send + Sync {
    /// The next nonce for `subject`.
    fn next_nonce(&self, subject: &Hash32) -> u128;
}

/// Strictly increasing counter seeded from wall-clock milliseconds.
///
/// Each call returns `max(last + 1, now_ms)`, so values stay monotonic across
/// restarts as long as the clock does not move backwards by more than the
/// number of nonces issued since. One instance per signer.
#[derive(Debug)]
pub struct MonotonicNonce {
    last: AtomicU64,
}

impl MonotonicNonce {
    /// Start from the current clock.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl Default for MonotonicNonce {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceSource for MonotonicNonce {
    fn next_nonce(&self, _subject: &Hash32) -> u128 {
        let now = Self::now_ms();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        u128::from(now.max(prev.saturating_add(1)))
    }
}

/// 128-bit random nonce from the OS CSPRNG.
#[derive(Debug, Default)]
pub struct RandomNonce;

impl NonceSource for RandomNonce {
    fn next_nonce(&self, _subject: &Hash32) -> u128 {
        let mut buf = [0u8; 16];
        rand_core::OsRng.fill_bytes(&mut buf);
        u128::from_be_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn monotonic_is_strictly_increasing() {
        let source = MonotonicNonce::new();
        let mut prev = 0u128;
        for _ in 0..10_000 {
            let n = source.next_nonce(&Hash32::ZERO);
            assert!(n > prev);
            prev = n;
        }
    }

    #[test]
    fn monotonic_is_unique_across_threads() {
        let source = Arc::new(MonotonicNonce::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&source);
                std::thread::spawn(move || (0..1000).map(|_| s.next_nonce(&Hash32::ZERO)).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for n in h.join().unwrap() {
                assert!(seen.insert(n), "duplicate nonce {n}");
            }
        }
    }

    #[test]
    fn monotonic_tracks_clock() {
        let n = MonotonicNonce::new().next_nonce(&Hash32::ZERO);
        assert!(n >= 1_600_000_000_000);
    }

    #[test]
    fn random_nonces_differ() {
        let source = RandomNonce;
        assert_ne!(source.next_nonce(&Hash32::ZERO), source.next_nonce(&Hash32::ZERO));
    }
}
