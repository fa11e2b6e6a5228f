use crate::record::DetectionRecord;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Insertion-ordered detection history, evicting the oldest records once
/// `capacity` is exceeded.
#[derive(Debug)]
pub struct DetectionStore {
    records: VecDeque<Arc<DetectionRecord>>,
    capacity: usize,
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl DetectionStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a batch, then truncate to the most recent `capacity` records.
    pub fn append<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = Arc<DetectionRecord>>,
    {
        self.records.extend(batch);
        let overflow = self.records.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.records.drain(..overflow);
        }
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn get_recent(&self, limit: usize) -> Vec<Arc<DetectionRecord>> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<DetectionRecord>> {
        self.records.iter().find(|r| r.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BoundingBox;
    use chrono::Utc;

    fn record(n: usize) -> Arc<DetectionRecord> {
        Arc::new(DetectionRecord {
            id: format!("rec_{}", n),
            timestamp: Utc::now(),
            class_name: "deer".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(0, 0, 10, 10),
            crop_jpeg: vec![n as u8],
        })
    }

    fn ids(records: &[Arc<DetectionRecord>]) -> Vec<String> {
        records.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn new_store_is_empty() {
        let store = DetectionStore::default();
        assert!(store.is_empty());
        assert_eq!(store.capacity(), 50);
        assert!(store.get_recent(10).is_empty());
    }

    #[test]
    fn append_never_exceeds_capacity() {
        let mut store = DetectionStore::default();
        for batch in 0..20 {
            store.append((0..7).map(|i| record(batch * 7 + i)));
            assert!(store.len() <= 50, "store grew to {}", store.len());
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn overflow_keeps_last_fifty_in_insertion_order() {
        let mut store = DetectionStore::default();
        store.append((0..73).map(record));

        let recent = store.get_recent(50);
        let expected: Vec<String> = (23..73).map(|n| format!("rec_{}", n)).collect();
        assert_eq!(ids(&recent), expected);
    }

    #[test]
    fn get_recent_returns_most_recent_last() {
        let mut store = DetectionStore::default();
        store.append((0..5).map(record));

        assert_eq!(ids(&store.get_recent(2)), vec!["rec_3", "rec_4"]);
        assert_eq!(store.get_recent(100).len(), 5);
        assert!(store.get_recent(0).is_empty());
    }

    #[test]
    fn get_by_id_finds_present_and_misses_evicted() {
        let mut store = DetectionStore::new(3);
        store.append((0..5).map(record));

        let found = store.get_by_id("rec_4").expect("rec_4 should be stored");
        assert_eq!(found.crop_jpeg, vec![4]);
        assert!(store.get_by_id("rec_1").is_none(), "rec_1 was evicted");
        assert!(store.get_by_id("never").is_none());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut store = DetectionStore::new(0);
        store.append((0..3).map(record));
        assert_eq!(ids(&store.get_recent(10)), vec!["rec_2"]);
    }
}
