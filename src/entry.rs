//! Cached values.
//!
//! A [`CacheEntry`] holds the last successful result for one key together with the time it was
//! captured. Entries know nothing about keys or requests; the [`FetchCache`](crate::FetchCache)
//! decides when to consult, overwrite or drop them.
use std::time::Duration;

/// Cached value with the time it was stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<T> {
    value: T,
    stored_at: Duration,
}

impl<T> CacheEntry<T> {
    /// Create new entry captured at `stored_at`.
    pub fn new(value: T, stored_at: Duration) -> Self {
        Self { value, stored_at }
    }

    /// Return a reference to the cached value.
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn stored_at(&self) -> Duration {
        self.stored_at
    }

    /// Age of this entry at `now`. Clocks that go backwards yield zero.
    pub fn age(&self, now: Duration) -> Duration {
        now.saturating_sub(self.stored_at)
    }

    /// Determine if this entry may still be served.
    pub fn is_fresh(&self, now: Duration, threshold: Duration) -> bool {
        self.age(now) < threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(300);

    #[test]
    fn fresh_until_threshold() {
        let entry = CacheEntry::new("orders", Duration::from_secs(10));
        assert!(entry.is_fresh(Duration::from_secs(10), THRESHOLD));
        assert!(entry.is_fresh(Duration::from_secs(309), THRESHOLD));
        assert!(!entry.is_fresh(Duration::from_secs(310), THRESHOLD));
    }

    #[test]
    fn age_saturates() {
        let entry = CacheEntry::new((), Duration::from_secs(10));
        assert_eq!(entry.age(Duration::from_secs(5)), Duration::ZERO);
    }
}
