//! Append-only, versioned ring buffer of progress snapshots.

use std::collections::VecDeque;

use chrono::Utc;

use crate::schema::ProgressSnapshot;

/// Snapshot contents before the buffer assigns version and timestamp.
#[derive(Debug, Clone)]
pub struct ProgressEntry {
    pub cycle: usize,
    pub epoch: usize,
    pub total_epochs_in_cycle: usize,
    pub score: f64,
    pub expression: String,
    pub log_message: String,
}

/// Bounded history of progress snapshots, queryable by version.
///
/// Versions start at 1 and increase by one per append. Eviction drops the
/// oldest snapshots but never renumbers the rest, so a poller that fell
/// behind simply gets the oldest retained snapshot onwards.
#[derive(Debug, Clone)]
pub struct ProgressBuffer {
    frames: VecDeque<ProgressSnapshot>,
    capacity: usize,
    latest_version: u64,
    evicted: u64,
}

impl Default for ProgressBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl ProgressBuffer {
    /// Retention ceiling used when none is configured.
    pub const DEFAULT_CAPACITY: usize = 2000;

    /// Create an empty buffer holding at most `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity,
            latest_version: 0,
            evicted: 0,
        }
    }

    /// Append a snapshot, assigning it the next version.
    pub fn append(&mut self, entry: ProgressEntry) -> &ProgressSnapshot {
        self.latest_version += 1;
        self.frames.push_back(ProgressSnapshot {
            version: self.latest_version,
            cycle: entry.cycle,
            epoch: entry.epoch,
            total_epochs_in_cycle: entry.total_epochs_in_cycle,
            score: entry.score,
            expression: entry.expression,
            timestamp: Utc::now(),
            log_message: entry.log_message,
        });

        while self.frames.len() > self.capacity {
            self.frames.pop_front();
            self.evicted += 1;
        }

        // Non-empty: we just pushed.
        &self.frames[self.frames.len() - 1]
    }

    /// Snapshots with a version greater than `version`, oldest first.
    ///
    /// `None` returns everything retained. A version older than the oldest
    /// retained snapshot returns the full retained tail.
    pub fn since(&self, version: Option<u64>) -> Vec<ProgressSnapshot> {
        let Some(version) = version else {
            return self.frames.iter().cloned().collect();
        };
        if version >= self.latest_version {
            return Vec::new();
        }
        let Some(oldest) = self.oldest_version() else {
            return Vec::new();
        };
        let start = (version + 1).saturating_sub(oldest) as usize;
        self.frames.range(start..).cloned().collect()
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&ProgressSnapshot> {
        self.frames.back()
    }

    /// Version of the most recent snapshot (0 when nothing was appended).
    pub fn latest_version(&self) -> u64 {
        self.latest_version
    }

    /// Version of the oldest retained snapshot.
    pub fn oldest_version(&self) -> Option<u64> {
        self.frames.front().map(|f| f.version)
    }

    /// Snapshots dropped by the retention ceiling so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(epoch: usize) -> ProgressEntry {
        ProgressEntry {
            cycle: 1,
            epoch,
            total_epochs_in_cycle: 10,
            score: epoch as f64,
            expression: format!("x1 * {epoch}"),
            log_message: String::new(),
        }
    }

    fn versions(frames: &[ProgressSnapshot]) -> Vec<u64> {
        frames.iter().map(|f| f.version).collect()
    }

    #[test]
    fn test_versions_start_at_one() {
        let mut buffer = ProgressBuffer::new(10);
        assert_eq!(buffer.latest_version(), 0);
        assert!(buffer.since(None).is_empty());

        assert_eq!(buffer.append(entry(1)).version, 1);
        assert_eq!(buffer.append(entry(2)).version, 2);
        assert_eq!(versions(&buffer.since(None)), vec![1, 2]);
        assert_eq!(versions(&buffer.since(Some(1))), vec![2]);
        assert!(buffer.since(Some(2)).is_empty());
        assert!(buffer.since(Some(99)).is_empty());
    }

    #[test]
    fn test_eviction_keeps_identity() {
        let mut buffer = ProgressBuffer::new(3);
        for i in 1..=5 {
            buffer.append(entry(i));
        }

        assert_eq!(buffer.since(None).len(), 3);
        assert_eq!(buffer.evicted(), 2);
        assert_eq!(buffer.oldest_version(), Some(3));
        assert_eq!(buffer.latest_version(), 5);
        assert_eq!(versions(&buffer.since(None)), vec![3, 4, 5]);
        assert_eq!(buffer.latest().map(|f| f.epoch), Some(5));
    }

    #[test]
    fn test_stale_poll_returns_retained_tail() {
        let mut buffer = ProgressBuffer::new(4);
        for i in 1..=10 {
            buffer.append(entry(i));
        }

        // Versions <= 6 are gone; asking for "after 5" yields everything left.
        assert_eq!(versions(&buffer.since(Some(5))), vec![7, 8, 9, 10]);
        assert_eq!(versions(&buffer.since(Some(0))), vec![7, 8, 9, 10]);
        assert_eq!(versions(&buffer.since(Some(8))), vec![9, 10]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buffer = ProgressBuffer::new(0);
        buffer.append(entry(1));
        buffer.append(entry(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(versions(&buffer.since(None)), vec![2]);
    }

    proptest! {
        #[test]
        fn prop_since_is_contiguous_suffix(
            capacity in 1usize..50,
            appends in 0usize..200,
            cursor in proptest::option::of(0u64..250),
        ) {
            let mut buffer = ProgressBuffer::new(capacity);
            for i in 0..appends {
                buffer.append(entry(i));
            }

            let all = versions(&buffer.since(None));
            prop_assert_eq!(all.len(), appends.min(capacity));
            prop_assert!(all.windows(2).all(|w| w[1] == w[0] + 1));
            prop_assert_eq!(all.last().copied().unwrap_or(0), appends as u64);

            let delta = versions(&buffer.since(cursor));
            prop_assert!(delta.windows(2).all(|w| w[1] == w[0] + 1));
            if let Some(v) = cursor {
                prop_assert!(delta.iter().all(|&d| d > v));
                let expected = all.iter().filter(|&&a| a > v).count();
                prop_assert_eq!(delta.len(), expected);
            } else {
                prop_assert_eq!(delta, all);
            }
        }
    }
}
