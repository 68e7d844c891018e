//! Latency statistics for benchmark reports.

use std::fmt;
use std::time::Duration;

const BUCKETS: usize = 20;

/// Running min/max/mean and a coarse histogram of latencies.
///
/// Bucket width is chosen up front so the same type serves per-shot decode
/// times (microseconds) and per-invocation times (milliseconds). The last
/// bucket collects everything beyond the range.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    pub min: Duration,
    pub max: Duration,
    pub total: Duration,
    pub count: u64,
    bucket_width: Duration,
    buckets: [u64; BUCKETS],
}

impl LatencyStats {
    pub fn new(bucket_width: Duration) -> Self {
        Self {
            min: Duration::MAX,
            max: Duration::ZERO,
            total: Duration::ZERO,
            count: 0,
            bucket_width: bucket_width.max(Duration::from_nanos(1)),
            buckets: [0; BUCKETS],
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.total += sample;
        self.count += 1;
        let idx = (sample.as_nanos() / self.bucket_width.as_nanos()).min(BUCKETS as u128 - 1);
        self.buckets[idx as usize] += 1;
    }

    /// Folds `other` into `self`. Both must use the same bucket width.
    pub fn merge(mut self, other: Self) -> Self {
        debug_assert_eq!(self.bucket_width, other.bucket_width);
        if other.count == 0 {
            return self;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.total += other.total;
        self.count += other.count;
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets) {
            *mine += theirs;
        }
        self
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total.div_f64(self.count as f64)
        }
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }
}

impl fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Count: {}", self.count)?;
        if self.count == 0 {
            return Ok(());
        }
        writeln!(f, "Min:   {:?}", self.min)?;
        writeln!(f, "Mean:  {:?}", self.mean())?;
        writeln!(f, "Max:   {:?}", self.max)?;
        writeln!(f, "Distribution ({:?} buckets):", self.bucket_width)?;
        for (i, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let lower = self.bucket_width * i as u32;
            if i == BUCKETS - 1 {
                writeln!(f, "  >= {lower:?}: {count}")?;
            } else {
                writeln!(f, "  {lower:?}..{:?}: {count}", lower + self.bucket_width)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_extremes_and_overflow_bucket() {
        let mut stats = LatencyStats::new(Duration::from_micros(10));
        stats.record(Duration::from_micros(3));
        stats.record(Duration::from_micros(15));
        stats.record(Duration::from_secs(1));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_micros(3));
        assert_eq!(stats.max, Duration::from_secs(1));
        assert_eq!(stats.buckets()[0], 1);
        assert_eq!(stats.buckets()[1], 1);
        assert_eq!(stats.buckets()[BUCKETS - 1], 1);
    }

    #[test]
    fn merge_matches_recording_everything_once() {
        let width = Duration::from_micros(10);
        let samples: Vec<Duration> = (0..40).map(|i| Duration::from_micros(i * 7)).collect();

        let mut whole = LatencyStats::new(width);
        samples.iter().for_each(|&s| whole.record(s));

        let (left, right) = samples.split_at(13);
        let mut a = LatencyStats::new(width);
        left.iter().for_each(|&s| a.record(s));
        let mut b = LatencyStats::new(width);
        right.iter().for_each(|&s| b.record(s));
        let merged = a.merge(b);

        assert_eq!(merged.count, whole.count);
        assert_eq!(merged.min, whole.min);
        assert_eq!(merged.max, whole.max);
        assert_eq!(merged.mean(), whole.mean());
        assert_eq!(merged.buckets(), whole.buckets());
    }

    #[test]
    fn empty_stats_have_zero_mean() {
        let stats = LatencyStats::new(Duration::from_millis(1));
        assert_eq!(stats.mean(), Duration::ZERO);
        assert_eq!(stats.to_string(), "Count: 0\n");
    }
}
