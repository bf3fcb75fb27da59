//! Pipeline statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::hit_test::HitTestStats;
use crate::routing::RouteCacheStats;

/// Snapshot of pipeline counters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineStats {
    pub submitted: u64,
    /// Events that completed with a processed notification, coalesced included
    pub processed: u64,
    /// Events that completed with an error notification
    pub errors: u64,
    /// Processed events no handler marked handled
    pub unhandled: u64,
    pub coalesced: u64,
    /// Events that ran longer than the configured timeout
    pub timeouts: u64,
    /// Processor re-invocations after a failure
    pub retries: u64,
    pub total_time: Duration,
    pub average_time: Duration,
    pub max_time: Duration,
    /// Events submitted but not yet completed
    pub queue_depth: usize,
    pub processor_count: usize,
    pub hit_test: HitTestStats,
    pub route_cache: Option<RouteCacheStats>,
}

impl PipelineStats {
    /// Events that reached a terminal notification
    pub fn completed(&self) -> u64 {
        self.processed + self.errors
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub submitted: AtomicU64,
    pub processed: AtomicU64,
    pub errors: AtomicU64,
    pub unhandled: AtomicU64,
    pub coalesced: AtomicU64,
    pub timeouts: AtomicU64,
    pub retries: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
    pub depth: AtomicUsize,
}

impl StatsCounters {
    pub fn record_time(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.processed.load(Ordering::Acquire) + self.errors.load(Ordering::Acquire)
    }

    pub fn snapshot(
        &self,
        processor_count: usize,
        hit_test: HitTestStats,
        route_cache: Option<RouteCacheStats>,
    ) -> PipelineStats {
        let processed = self.processed.load(Ordering::Acquire);
        let errors = self.errors.load(Ordering::Acquire);
        let total_time = Duration::from_micros(self.total_micros.load(Ordering::Relaxed));
        let completed = processed + errors;
        let average_time = if completed == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((total_time.as_nanos() / u128::from(completed)) as u64)
        };
        PipelineStats {
            submitted: self.submitted.load(Ordering::Acquire),
            processed,
            errors,
            unhandled: self.unhandled.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            total_time,
            average_time,
            max_time: Duration::from_micros(self.max_micros.load(Ordering::Relaxed)),
            queue_depth: self.depth.load(Ordering::Acquire),
            processor_count,
            hit_test,
            route_cache,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_over_completed() {
        let counters = StatsCounters::default();
        let empty = counters.snapshot(0, HitTestStats::default(), None);
        assert_eq!(empty.average_time, Duration::ZERO);

        counters.processed.fetch_add(3, Ordering::Relaxed);
        counters.errors.fetch_add(1, Ordering::Relaxed);
        counters.record_time(Duration::from_micros(100));
        counters.record_time(Duration::from_micros(300));

        let stats = counters.snapshot(2, HitTestStats::default(), None);
        assert_eq!(stats.completed(), 4);
        assert_eq!(stats.total_time, Duration::from_micros(400));
        assert_eq!(stats.average_time, Duration::from_micros(100));
        assert_eq!(stats.max_time, Duration::from_micros(300));
        assert_eq!(stats.processor_count, 2);
    }

    #[test]
    fn test_average_with_counts_past_u32() {
        let counters = StatsCounters::default();
        let completed = u64::from(u32::MAX) + 1;
        counters.processed.fetch_add(completed, Ordering::Relaxed);
        counters.record_time(Duration::from_secs(completed));

        let stats = counters.snapshot(0, HitTestStats::default(), None);
        assert_eq!(stats.average_time, Duration::from_secs(1));
    }
}
