use crate::utils::consts::MAX_HIST_BINS;

/// One cluster of similar widths. All figures are in samples and kept as
/// integers; `mean` is re-derived from `sum / count` on every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistBin {
    pub count: u32,
    pub sum: i64,
    pub mean: i32,
    pub min: i32,
    pub max: i32,
}

impl HistBin {
    fn seed(value: i32) -> Self {
        Self { count: 1, sum: value as i64, mean: value, min: value, max: value }
    }

    fn add(&mut self, value: i32) {
        self.count += 1;
        self.sum += value as i64;
        self.mean = (self.sum / self.count as i64) as i32;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn absorb(&mut self, other: &HistBin) {
        self.count += other.count;
        self.sum += other.sum;
        self.mean = (self.sum / self.count as i64) as i32;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Two widths land in the same bin when their means differ by less than
/// `tolerance` of the larger one.
fn matches(a: i32, b: i32, tolerance: f32) -> bool {
    ((a - b).abs() as f32) < tolerance * a.max(b) as f32
}

/// Tolerance-bucketed width histogram, up to [`MAX_HIST_BINS`] bins.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    bins: Vec<HistBin>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bins(&self) -> &[HistBin] {
        &self.bins
    }

    pub fn bins_count(&self) -> usize {
        self.bins.len()
    }

    pub fn clear(&mut self) {
        self.bins.clear();
    }

    /// Add each value to the first bin within tolerance of its mean, opening
    /// a new bin when none matches. Values beyond the bin limit are dropped.
    pub fn accumulate(&mut self, values: &[i32], tolerance: f32) {
        for &value in values {
            let hit_index = self
                .bins
                .iter()
                .position(|bin| matches(value, bin.mean, tolerance));
            match hit_index {
                Some(idx) => self.bins[idx].add(value),
                None if self.bins.len() < MAX_HIST_BINS => self.bins.push(HistBin::seed(value)),
                None => {}
            }
        }
    }

    /// Merge every pair of bins whose means fall within tolerance, repeating
    /// until stable.
    pub fn fuse(&mut self, tolerance: f32) {
        let mut n = 0;
        while n + 1 < self.bins.len() {
            let mut m = n + 1;
            while m < self.bins.len() {
                if matches(self.bins[n].mean, self.bins[m].mean, tolerance) {
                    let other = self.bins[m];
                    self.bins[n].absorb(&other);
                    self.bins.remove(m);
                    // re-check the same slot against the grown bin
                } else {
                    m += 1;
                }
            }
            n += 1;
        }
    }

    /// Ascending by mean; ties keep their original order.
    pub fn sort_by_mean(&mut self) {
        self.bins.sort_by_key(|bin| bin.mean);
    }

    /// Ascending by count; ties keep their original order.
    pub fn sort_by_count(&mut self) {
        self.bins.sort_by_key(|bin| bin.count);
    }

    /// First bin whose [min, max] range covers the value.
    pub fn find_bin_index(&self, value: i32) -> Option<usize> {
        self.bins
            .iter()
            .position(|bin| bin.min <= value && value <= bin.max)
    }

    pub fn delete(&mut self, index: usize) {
        if index < self.bins.len() {
            self.bins.remove(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_bin_wins() {
        let mut hist = Histogram::new();
        // 100 opens a bin; 110 matches it (within 20%); 240 opens another;
        // 115 still matches the first bin even though its mean moved
        hist.accumulate(&[100, 110, 240, 115], 0.2);
        assert_eq!(hist.bins_count(), 2);
        assert_eq!(hist.bins()[0].count, 3);
        assert_eq!(hist.bins()[0].mean, 108);
        assert_eq!(hist.bins()[1].count, 1);
    }

    #[test]
    fn respects_bin_limit() {
        let mut hist = Histogram::new();
        let values: Vec<i32> = (0..40).map(|n| 100 << n.min(24)).collect();
        hist.accumulate(&values, 0.1);
        assert!(hist.bins_count() <= MAX_HIST_BINS);
    }

    #[test]
    fn fuse_is_idempotent() {
        let mut hist = Histogram::new();
        // Two bins drift toward each other as samples accumulate
        hist.accumulate(&[100, 118, 135, 400, 1000], 0.1);
        let mut once = hist.clone();
        once.fuse(0.2);
        let mut twice = once.clone();
        twice.fuse(0.2);
        assert_eq!(once.bins(), twice.bins());
    }

    #[test]
    fn fuse_merges_within_tolerance() {
        let mut hist = Histogram::new();
        hist.accumulate(&[100, 119, 142, 1000], 0.05);
        assert_eq!(hist.bins_count(), 4);
        hist.fuse(0.2);
        // 100 and 119 merge to 109; 142 is within 20% of 142 vs 109? no:
        // |109-142| = 33 >= 0.2*142 = 28, so it stays apart
        assert_eq!(hist.bins_count(), 3);
    }

    #[test]
    fn find_bin_by_range() {
        let mut hist = Histogram::new();
        hist.accumulate(&[100, 110, 500], 0.2);
        assert_eq!(hist.find_bin_index(105), Some(0));
        assert_eq!(hist.find_bin_index(500), Some(1));
        assert_eq!(hist.find_bin_index(300), None);
    }

    #[test]
    fn sorts_and_deletes() {
        let mut hist = Histogram::new();
        hist.accumulate(&[500, 500, 100, 900], 0.1);
        hist.sort_by_mean();
        let means: Vec<i32> = hist.bins().iter().map(|b| b.mean).collect();
        assert_eq!(means, vec![100, 500, 900]);
        hist.sort_by_count();
        assert_eq!(hist.bins()[2].mean, 500);
        hist.delete(0);
        assert_eq!(hist.bins_count(), 2);
    }
}
