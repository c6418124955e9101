//! Reach counting for loop detection.
//!
//! Every host callback records the script source location it was called
//! from. A location seen more than once means the script re-entered a
//! statement, i.e. template control flow looped.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ReachCounter {
    counts: HashMap<String, u32>,
}

impl ReachCounter {
    /// Records a visit to `key` and returns the number of prior visits.
    pub fn add(&mut self, key: &str) -> u32 {
        let count = self.counts.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count += 1;
        previous
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_prior_visits_per_key() {
        let mut counter = ReachCounter::default();
        assert_eq!(counter.add("foo"), 0);
        assert_eq!(counter.add("foo"), 1);
        assert_eq!(counter.add("bar"), 0);
        counter.add("bar");
        assert_eq!(counter.add("bar"), 2);
    }

    #[test]
    fn clear_resets_all_keys() {
        let mut counter = ReachCounter::default();
        counter.add("foo");
        counter.add("bar");
        counter.clear();
        assert_eq!(counter.add("bar"), 0);
        assert_eq!(counter.add("foo"), 0);
    }
}
