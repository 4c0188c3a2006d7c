//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Bounded FIFO window over the most recent readings."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::vec_deque::{self, VecDeque};

/// Fixed-capacity window that keeps the newest entries in arrival order.
///
/// Appending past capacity evicts from the head. The window always starts
/// empty; nothing is backfilled.
#[derive(Debug, Clone)]
pub struct HistoryWindow<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T> HistoryWindow<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    pub fn append(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
    }

    /// The most recent `min(n, len)` entries, oldest first.
    pub fn snapshot(&self, n: usize) -> vec_deque::Iter<'_, T> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.range(start..)
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries dropped from the head so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn has_evicted(&self) -> bool {
        self.evicted > 0
    }
}

impl<'a, T> IntoIterator for &'a HistoryWindow<T> {
    type Item = &'a T;
    type IntoIter = vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_tracks_min_of_appends_and_capacity() {
        for capacity in [1usize, 3, 120] {
            let mut window = HistoryWindow::new(capacity);
            for n in 1..=250usize {
                window.append(n);
                assert_eq!(window.len(), n.min(capacity));
                assert_eq!(window.latest(), Some(&n));
            }
        }
    }

    #[test]
    fn eviction_is_fifo_and_keeps_order() {
        let mut window = HistoryWindow::new(3);
        for n in 1..=4 {
            window.append(n);
        }
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(window.evicted(), 1);
        assert!(window.has_evicted());
    }

    #[test]
    fn snapshot_returns_most_recent_in_arrival_order() {
        let mut window = HistoryWindow::new(5);
        for n in 1..=5 {
            window.append(n);
        }
        assert_eq!(window.snapshot(2).copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(window.snapshot(50).count(), 5);
        assert_eq!(window.snapshot(0).count(), 0);
    }

    #[test]
    fn starts_empty_and_clamps_zero_capacity() {
        let mut window: HistoryWindow<u8> = HistoryWindow::new(0);
        assert!(window.is_empty());
        assert_eq!(window.latest(), None);
        assert_eq!(window.capacity(), 1);
        window.append(7);
        window.append(8);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![8]);
        assert_eq!(window.evicted(), 1);
    }
}
