//! Per-isolate duration tracking, used to order submitted tasks
//! longest-first (LPT scheduling minimizes makespan across the slave fleet).

use serde::{Deserialize, Serialize};

/// Smoothing factor for the exponentially weighted moving average. Weighted
/// toward history so a single slow/fast outlier doesn't whipsaw the estimate.
const EWMA_ALPHA: f64 = 0.3;

/// Observed vs. estimated duration for one isolate hash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationRecord {
    pub ewma_secs: f64,
}

impl DurationRecord {
    pub fn new(initial_secs: f64) -> Self {
        Self { ewma_secs: initial_secs }
    }

    /// Fold a freshly observed duration into the running estimate.
    pub fn update(self, observed_secs: f64) -> Self {
        Self {
            ewma_secs: (1.0 - EWMA_ALPHA) * self.ewma_secs + EWMA_ALPHA * observed_secs,
        }
    }
}

/// Sort task descriptions by descending known (or estimated) duration.
/// Tasks with no duration history sort after all known ones, stable among
/// themselves, mirroring submission order.
pub fn sort_by_duration_desc<T>(items: &mut [T], duration_for: impl Fn(&T) -> Option<f64>) {
    items.sort_by(|a, b| {
        let da = duration_for(a);
        let db = duration_for(b);
        match (da, db) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_update_applies_configured_weight() {
        let record = DurationRecord::new(10.0).update(20.0);
        assert!((record.ewma_secs - 13.0).abs() < 1e-9);
    }

    #[test]
    fn sort_by_duration_desc_puts_unknown_last_and_stable() {
        let mut items = vec![("a", Some(5.0)), ("b", None), ("c", Some(10.0)), ("d", None)];
        sort_by_duration_desc(&mut items, |(_, d)| *d);
        let order: Vec<&str> = items.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
    }
}
