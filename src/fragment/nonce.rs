//! Per-broadcast nonces derived from the wall clock.
//!
//! A [`Nonce`] namespaces every key an operation leaves behind in the store.
//! [`NonceSource`] hands out nanosecond timestamps and never repeats a value
//! within one process, even when the clock stalls or steps backwards.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use bincode::{Decode, Encode};
use derive_more::{Display, From, Into};

/// Timestamp-derived value unique to a single broadcast.
///
/// # Examples
///
/// ```
/// use fragcast::fragment::Nonce;
/// let nonce = Nonce::new(42);
/// assert_eq!(nonce.get(), 42);
/// ```
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Encode, Decode, Display, From, Into,
)]
#[display("{_0}")]
pub struct Nonce(u64);

impl Nonce {
    /// Wrap a raw nonce value.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the raw nonce value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Monotonic generator of [`Nonce`] values.
#[derive(Debug, Default)]
pub struct NonceSource {
    last: AtomicU64,
}

impl NonceSource {
    /// Create a source whose first nonce is the current time.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Create a source that never issues a value at or below `floor`.
    #[must_use]
    pub const fn starting_after(floor: Nonce) -> Self {
        Self {
            last: AtomicU64::new(floor.get()),
        }
    }

    /// Issue the next nonce.
    ///
    /// The result is the current Unix time in nanoseconds, bumped past the
    /// previously issued value when the clock has not advanced.
    #[must_use]
    pub fn next_nonce(&self) -> Nonce {
        let now = unix_nanos();
        let advance = |last: u64| now.max(last.saturating_add(1));
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last)))
            .unwrap_or_else(|last| last);
        Nonce::new(advance(previous))
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    #[test]
    fn nonces_strictly_increase() {
        let source = NonceSource::new();
        let first = source.next_nonce();
        let second = source.next_nonce();
        let third = source.next_nonce();
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn nonces_skip_past_a_future_floor() {
        let floor = Nonce::new(u64::MAX - 10);
        let source = NonceSource::starting_after(floor);
        assert_eq!(source.next_nonce(), Nonce::new(u64::MAX - 9));
    }

    #[test]
    fn concurrent_callers_never_share_a_nonce() {
        let source = Arc::new(NonceSource::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || (0..250).map(|_| source.next_nonce()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for nonce in handle.join().expect("nonce thread panicked") {
                assert!(seen.insert(nonce), "duplicate nonce {nonce}");
            }
        }
        assert_eq!(seen.len(), 1000);
    }
}
