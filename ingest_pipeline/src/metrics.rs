//! Lock-free counters for pipeline and processor invocations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct OperationMetrics {
    current: AtomicU64,
    count: AtomicU64,
    time_nanos: AtomicU64,
    failed: AtomicU64,
}

impl OperationMetrics {
    pub fn before(&self) {
        self.before_n(1);
    }

    pub fn before_n(&self, n: u64) {
        self.current.fetch_add(n, Ordering::Relaxed);
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn after(&self, elapsed: Duration) {
        self.after_n(1, elapsed);
    }

    pub fn after_n(&self, n: u64, elapsed: Duration) {
        self.current.fetch_sub(n, Ordering::Relaxed);
        self.time_nanos.fetch_add(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    pub fn failed(&self) {
        self.failed_n(1);
    }

    pub fn failed_n(&self, n: u64) {
        self.failed.fetch_add(n, Ordering::Relaxed);
    }

    /// Fold the totals of `other` into this counter. In-flight counts are not carried.
    pub fn add(&self, other: &Self) {
        self.count
            .fetch_add(other.count.load(Ordering::Relaxed), Ordering::Relaxed);
        self.time_nanos
            .fetch_add(other.time_nanos.load(Ordering::Relaxed), Ordering::Relaxed);
        self.failed
            .fetch_add(other.failed.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    pub fn stats(&self) -> OperationStats {
        OperationStats {
            count: self.count.load(Ordering::Relaxed),
            current: self.current.load(Ordering::Relaxed),
            time_in_millis: self.time_nanos.load(Ordering::Relaxed) / 1_000_000,
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub current: u64,
    pub time_in_millis: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_adds() {
        let a = OperationMetrics::default();
        a.before_n(3);
        a.after_n(2, Duration::from_millis(5));
        a.failed();

        assert_eq!(
            a.stats(),
            OperationStats {
                count: 3,
                current: 1,
                time_in_millis: 5,
                failed: 1
            }
        );

        let b = OperationMetrics::default();
        b.add(&a);
        assert_eq!(
            b.stats(),
            OperationStats {
                count: 3,
                current: 0,
                time_in_millis: 5,
                failed: 1
            }
        );
    }
}
