//! Per-packet nonce source.
//!
//! Nonces are anchored to wall-clock milliseconds with a random sub-millisecond
//! component, then forced strictly upward so that a fast sender never repeats
//! or regresses even when the clock stalls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Monotonic nonce generator, safe to share between tasks.
#[derive(Debug)]
pub struct NonceGenerator {
    last: AtomicU64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Next nonce, strictly greater than every value handed out before.
    pub fn next_nonce(&self) -> u64 {
        let candidate = unix_millis()
            .saturating_mul(1000)
            .saturating_add(rand::rng().random_range(0..1000));

        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the Unix epoch; zero if the clock is before it.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn nonces_strictly_increase() {
        let gen = NonceGenerator::new();
        let mut prev = gen.next_nonce();
        for _ in 0..10_000 {
            let n = gen.next_nonce();
            assert!(n > prev);
            prev = n;
        }
    }

    #[test]
    fn concurrent_callers_never_share_a_nonce() {
        let gen = Arc::new(NonceGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = gen.clone();
                std::thread::spawn(move || (0..1000).map(|_| gen.next_nonce()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect();
        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
        assert_eq!(total, 4000);
    }
}
