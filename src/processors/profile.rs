use crate::models::validation::{ColumnStats, RangeExample, RangeFinding};
use std::collections::hash_map::DefaultHasher;
use std::collections::BinaryHeap;
use std::hash::{Hash, Hasher};

/// Welford running mean and variance.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Sample standard deviation
    pub fn std(&self) -> Option<f64> {
        (self.count > 1).then(|| (self.m2 / (self.count - 1) as f64).sqrt())
    }
}

/// Picks the same rows on both sides of a comparison by hashing the
/// observation's identity rather than its position.
#[derive(Debug, Clone, Copy)]
pub struct SampleSelector {
    modulus: u64,
}

impl SampleSelector {
    pub fn new(modulus: u64) -> Self {
        Self {
            modulus: modulus.max(1),
        }
    }

    /// Hash key of a selected row, `None` when the modulus skips it.
    pub fn key(&self, timestamp_millis: i64, station: &str) -> Option<u64> {
        let mut hasher = DefaultHasher::new();
        timestamp_millis.hash(&mut hasher);
        station.hash(&mut hasher);
        let key = hasher.finish();
        (key % self.modulus == 0).then_some(key)
    }
}

/// Values of the rows with the smallest keys, at most `capacity` of them
/// (0 = unbounded).
///
/// Keys come from [`SampleSelector`], so two sides holding the same rows keep
/// the same subset whatever order the rows arrive in.
#[derive(Debug, Clone, Default)]
pub struct BoundedSample {
    capacity: usize,
    entries: BinaryHeap<(u64, u64)>,
}

impl BoundedSample {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BinaryHeap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, key: u64, value: f64) {
        let entry = (key, value.to_bits());
        if self.capacity == 0 || self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else if self.entries.peek().is_some_and(|top| entry < *top) {
            self.entries.pop();
            self.entries.push(entry);
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, bits)| f64::from_bits(*bits)).collect()
    }
}

/// Null counts and numeric moments for one column on one side.
#[derive(Debug, Clone, Default)]
pub struct ColumnProfile {
    pub rows: u64,
    pub nulls: u64,
    pub stats: RunningStats,
    pub sample: BoundedSample,
}

impl ColumnProfile {
    pub fn new(sample_capacity: usize) -> Self {
        Self {
            sample: BoundedSample::new(sample_capacity),
            ..Self::default()
        }
    }

    pub fn null_pct(&self) -> f64 {
        if self.rows == 0 {
            0.0
        } else {
            self.nulls as f64 / self.rows as f64 * 100.0
        }
    }

    /// `key` is the row's sample key when the selector picked it.
    pub fn push_value(&mut self, value: f64, key: Option<u64>) {
        self.stats.push(value);
        if let Some(key) = key {
            self.sample.push(key, value);
        }
    }

    pub fn summarize(&self) -> ColumnStats {
        ColumnStats {
            count: self.stats.count(),
            mean: self.stats.mean(),
            median: median(&mut self.sample.values()),
            std: self.stats.std(),
        }
    }
}

pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// `|a - b| / max(1, |a|)`, so values near zero compare absolutely.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    (a - b).abs() / a.abs().max(1.0)
}

/// Out-of-bound tally for one bounded column.
#[derive(Debug, Clone)]
pub struct RangeTally {
    pub column: String,
    pub min: f64,
    pub max: f64,
    pub checked: u64,
    pub out_of_range: u64,
    pub examples: Vec<RangeExample>,
    example_limit: usize,
}

impl RangeTally {
    pub fn new(column: &str, (min, max): (f64, f64), example_limit: usize) -> Self {
        Self {
            column: column.to_string(),
            min,
            max,
            checked: 0,
            out_of_range: 0,
            examples: Vec::new(),
            example_limit,
        }
    }

    pub fn observe(&mut self, value: f64, partition: i32, row: u64) {
        self.checked += 1;
        if value < self.min || value > self.max {
            self.out_of_range += 1;
            if self.examples.len() < self.example_limit {
                self.examples.push(RangeExample {
                    partition,
                    row,
                    value,
                });
            }
        }
    }

    pub fn into_finding(self) -> RangeFinding {
        let ratio = if self.checked == 0 {
            0.0
        } else {
            self.out_of_range as f64 / self.checked as f64
        };
        RangeFinding {
            column: self.column,
            min: self.min,
            max: self.max,
            checked: self.checked,
            out_of_range: self.out_of_range,
            ratio,
            examples: self.examples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = RunningStats::default();
        values.iter().for_each(|v| stats.push(*v));

        assert_eq!(stats.mean(), Some(5.0));
        let mean = 5.0;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 7.0;
        assert!((stats.std().unwrap() - var.sqrt()).abs() < 1e-12);
        assert_eq!(RunningStats::default().mean(), None);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_sample_selector_is_deterministic() {
        let selector = SampleSelector::new(3);
        let picks: Vec<Option<u64>> = (0..50).map(|i| selector.key(i * 3_600_000, "Xitun")).collect();
        let again: Vec<Option<u64>> = (0..50).map(|i| selector.key(i * 3_600_000, "Xitun")).collect();
        assert_eq!(picks, again);
        assert!(picks.iter().any(Option::is_some));
        assert!(picks.iter().flatten().all(|k| k % 3 == 0));
        assert!(SampleSelector::new(1).key(0, "").is_some());
    }

    #[test]
    fn test_sample_stays_bounded() {
        let selector = SampleSelector::new(1);
        let mut profile = ColumnProfile::new(100);
        for i in 0..10_000i64 {
            profile.push_value(i as f64, selector.key(i * 3_600_000, "Zhongshan"));
        }
        assert_eq!(profile.sample.len(), 100);
        assert_eq!(profile.stats.count(), 10_000);
        assert!(profile.summarize().median.is_some());

        let mut unbounded = ColumnProfile::new(0);
        for i in 0..500i64 {
            unbounded.push_value(i as f64, selector.key(i, "Zhongshan"));
        }
        assert_eq!(unbounded.sample.len(), 500);
    }

    #[test]
    fn test_sample_keeps_same_rows_in_any_order() {
        let selector = SampleSelector::new(1);
        let rows: Vec<(u64, f64)> = (0..400i64)
            .filter_map(|i| selector.key(i * 60_000, "Xitun").map(|k| (k, i as f64)))
            .collect();

        let mut forward = BoundedSample::new(25);
        rows.iter().for_each(|(k, v)| forward.push(*k, *v));
        let mut backward = BoundedSample::new(25);
        rows.iter().rev().for_each(|(k, v)| backward.push(*k, *v));

        let mut a = forward.values();
        let mut b = backward.values();
        assert_eq!(median(&mut a), median(&mut b));
        a.sort_by(f64::total_cmp);
        b.sort_by(f64::total_cmp);
        assert_eq!(a, b);
    }

    #[test]
    fn test_range_tally() {
        let mut tally = RangeTally::new("winddirec", (0.0, 360.0), 1);
        tally.observe(10.0, 2023, 0);
        tally.observe(400.0, 2023, 1);
        tally.observe(-1.0, 2023, 2);
        let finding = tally.into_finding();
        assert_eq!(finding.out_of_range, 2);
        assert_eq!(finding.examples.len(), 1);
        assert_eq!(finding.examples[0].value, 400.0);
        assert!((finding.ratio - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_relative_difference_floor() {
        assert!((relative_difference(0.001, 0.002) - 0.001).abs() < 1e-12);
        assert!((relative_difference(200.0, 201.0) - 0.005).abs() < 1e-12);
    }
}
