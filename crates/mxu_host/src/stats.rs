//! Latency statistics for offload benchmarks.
//!
//! Collects per-request service times and reports min, average, max and
//! a coarse histogram. Trackers built on separate worker threads are
//! combined with [`LatencyStats::merge`].

/// Number of histogram buckets; the last one is open-ended.
const BUCKETS: usize = 20;

/// Width of one histogram bucket in nanoseconds (100 us).
const BUCKET_NS: u64 = 100_000;

/// Accumulated latency measurements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub count: u64,
    pub buckets: [u64; BUCKETS],
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyStats {
    /// Creates an empty tracker. `min` starts at `u64::MAX` so the first
    /// measurement replaces it.
    pub fn new() -> Self {
        Self {
            min: u64::MAX,
            max: 0,
            sum: 0,
            count: 0,
            buckets: [0; BUCKETS],
        }
    }

    /// Records one latency measurement in nanoseconds.
    pub fn update(&mut self, nanos: u64) {
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
        self.sum = self.sum.saturating_add(nanos);
        self.count += 1;

        let idx = ((nanos / BUCKET_NS) as usize).min(BUCKETS - 1);
        self.buckets[idx] += 1;
    }

    /// Folds `other` into `self`.
    pub fn merge(mut self, other: LatencyStats) -> LatencyStats {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum = self.sum.saturating_add(other.sum);
        self.count += other.count;
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets) {
            *mine += theirs;
        }
        self
    }

    /// Average latency in nanoseconds, or 0.0 with no measurements.
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Prints the summary and the non-empty histogram buckets.
    pub fn print_report(&self) {
        println!("\nLatency Metrics (Service Time)");
        println!("Count: {}", self.count);
        if self.count == 0 {
            return;
        }

        let avg_ns = self.avg();
        if avg_ns < 1_000_000.0 {
            println!("Min:   {:.2} us", self.min as f64 / 1e3);
            println!("Avg:   {:.2} us", avg_ns / 1e3);
            println!("Max:   {:.2} us", self.max as f64 / 1e3);
        } else {
            println!("Min:   {:.2} ms", self.min as f64 / 1e6);
            println!("Avg:   {:.2} ms", avg_ns / 1e6);
            println!("Max:   {:.2} ms", self.max as f64 / 1e6);
        }

        let width_us = BUCKET_NS / 1_000;
        println!("Distribution ({width_us}us buckets):");
        for (i, &count) in self.buckets.iter().enumerate() {
            if count > 0 {
                let open = if i == BUCKETS - 1 { ">" } else { "" };
                let lower = i as u64 * width_us;
                let upper = (i as u64 + 1) * width_us;
                println!("[{lower:5}-{upper:5}{open} us]: {count}");
            }
        }
    }
}
