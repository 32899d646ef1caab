//! Exclusion ranges
//!
//! Session-wide time ranges marked for disregard during scoring review. They
//! never influence detection. The set is kept sorted and overlapping ranges
//! are merged on every insert or update.

use crate::episodes::{merge_episodes, update_logical};
use crate::error::ScoringError;
use crate::types::{BehaviourMask, Episode, TimeBase};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExclusionSet {
    ranges: Vec<Episode>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = Episode>) -> Self {
        let ranges: Vec<Episode> = ranges.into_iter().collect();
        Self {
            ranges: merge_episodes(&ranges, 0.0),
        }
    }

    pub fn ranges(&self) -> &[Episode] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Add a range; returns the index of the range now covering it
    pub fn insert(&mut self, range: Episode) -> usize {
        self.ranges.push(range);
        self.normalize();
        self.index_covering(range.start)
    }

    /// Replace the range at `index`
    pub fn update(&mut self, index: usize, range: Episode) -> Result<usize, ScoringError> {
        let slot = self.ranges.get_mut(index).ok_or_else(|| {
            ScoringError::InvalidEdit(format!("no exclusion range at index {}", index))
        })?;
        *slot = range;
        self.normalize();
        Ok(self.index_covering(range.start))
    }

    pub fn delete(&mut self, index: usize) -> Result<Episode, ScoringError> {
        if index >= self.ranges.len() {
            return Err(ScoringError::InvalidEdit(format!(
                "no exclusion range at index {}",
                index
            )));
        }
        Ok(self.ranges.remove(index))
    }

    pub fn contains_time(&self, t: f64) -> bool {
        self.ranges.iter().any(|r| r.contains_time(t))
    }

    /// Frames whose timestamp falls inside any range
    pub fn excluded_frames(&self, time_base: &TimeBase) -> BehaviourMask {
        update_logical(&self.ranges, time_base)
    }

    fn normalize(&mut self) {
        self.ranges = merge_episodes(&self.ranges, 0.0);
    }

    fn index_covering(&self, t: f64) -> usize {
        self.ranges
            .iter()
            .position(|r| r.contains_time(t))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ep(start: f64, end: f64) -> Episode {
        Episode::new(start, end).unwrap()
    }

    #[test]
    fn test_insert_merges_overlaps() {
        let mut set = ExclusionSet::new();
        set.insert(ep(5.0, 6.0));
        set.insert(ep(1.0, 2.0));
        let index = set.insert(ep(1.5, 5.5));
        assert_eq!(set.ranges(), &[ep(1.0, 6.0)]);
        assert_eq!(index, 0);
    }

    #[test]
    fn test_update_keeps_order() {
        let mut set = ExclusionSet::from_ranges([ep(1.0, 2.0), ep(4.0, 5.0)]);
        let index = set.update(0, ep(6.0, 7.0)).unwrap();
        assert_eq!(set.ranges(), &[ep(4.0, 5.0), ep(6.0, 7.0)]);
        assert_eq!(index, 1);
        assert!(set.update(5, ep(0.0, 1.0)).is_err());
    }

    #[test]
    fn test_delete() {
        let mut set = ExclusionSet::from_ranges([ep(1.0, 2.0), ep(4.0, 5.0)]);
        assert_eq!(set.delete(0).unwrap(), ep(1.0, 2.0));
        assert_eq!(set.len(), 1);
        assert!(matches!(set.delete(3), Err(ScoringError::InvalidEdit(_))));
    }

    #[test]
    fn test_excluded_frames() {
        let tb = TimeBase::uniform(6, 1.0).unwrap();
        let set = ExclusionSet::from_ranges([ep(1.0, 2.0)]);
        let mask = set.excluded_frames(&tb);
        assert_eq!(mask.count(), 2);
        assert!(set.contains_time(1.5));
        assert!(!set.contains_time(3.0));
    }
}
