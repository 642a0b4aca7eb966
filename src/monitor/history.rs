//! Bounded, append-only call histories.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// History size value meaning "never truncate".
pub const UNBOUNDED_HISTORY: i64 = -1;

/// Default number of records kept per history.
pub const DEFAULT_HISTORY_SIZE: i64 = 10;

/// Capacity of a [`History`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCapacity {
    /// Keep at most `max(n, 1)` records.
    Bounded(usize),
    /// Keep everything.
    Unbounded,
}

impl HistoryCapacity {
    /// Number of records retained after truncation, `None` when unbounded.
    ///
    /// The most recent record is always retained, so `Bounded(0)` retains one.
    #[must_use]
    pub fn bound(self) -> Option<usize> {
        match self {
            Self::Bounded(n) => Some(n.max(1)),
            Self::Unbounded => None,
        }
    }
}

impl Default for HistoryCapacity {
    fn default() -> Self {
        Self::Bounded(DEFAULT_HISTORY_SIZE.unsigned_abs() as usize)
    }
}

impl TryFrom<i64> for HistoryCapacity {
    type Error = ConfigurationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            UNBOUNDED_HISTORY => Ok(Self::Unbounded),
            v if v < 0 => Err(ConfigurationError::InvalidHistoryCapacity { value }),
            v => usize::try_from(v)
                .map(Self::Bounded)
                .map_err(|_| ConfigurationError::InvalidHistoryCapacity { value }),
        }
    }
}

/// A record that links back to its predecessor.
pub trait Linked {
    /// Drops the back-link; called when the record becomes the oldest retained one.
    fn unlink(&self);
}

/// Append-only sequence bounded by a [`HistoryCapacity`], newest last.
pub struct History<T> {
    records: VecDeque<Arc<T>>,
    capacity: HistoryCapacity,
}

impl<T: Linked> History<T> {
    #[must_use]
    pub fn new(capacity: HistoryCapacity) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> HistoryCapacity {
        self.capacity
    }

    /// The newest record.
    #[must_use]
    pub fn last(&self) -> Option<&Arc<T>> {
        self.records.back()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends `record` and truncates from the front.
    ///
    /// When anything was evicted, the new oldest record is unlinked so no
    /// retained record points outside the visible window.
    pub fn push(&mut self, record: Arc<T>) {
        self.records.push_back(record);

        let Some(bound) = self.capacity.bound() else {
            return;
        };
        if self.records.len() <= bound {
            return;
        }
        while self.records.len() > bound {
            self.records.pop_front();
        }
        if let Some(oldest) = self.records.front() {
            oldest.unlink();
        }
    }

    /// Immutable copy of the current window, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.records.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.records.iter()
    }
}

impl<T> fmt::Debug for History<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("len", &self.records.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::RwLock;

    struct Node {
        n: usize,
        prev: RwLock<Option<Arc<Node>>>,
    }

    impl Linked for Node {
        fn unlink(&self) {
            *self.prev.write().unwrap() = None;
        }
    }

    fn push_n(history: &mut History<Node>, count: usize) {
        for n in 0..count {
            let prev = history.last().cloned();
            history.push(Arc::new(Node {
                n,
                prev: RwLock::new(prev),
            }));
        }
    }

    #[test]
    fn capacity_from_i64() {
        assert_eq!(HistoryCapacity::try_from(-1).unwrap(), HistoryCapacity::Unbounded);
        assert_eq!(HistoryCapacity::try_from(0).unwrap(), HistoryCapacity::Bounded(0));
        assert_eq!(HistoryCapacity::try_from(7).unwrap(), HistoryCapacity::Bounded(7));
        assert_eq!(
            HistoryCapacity::try_from(-2).unwrap_err(),
            ConfigurationError::InvalidHistoryCapacity { value: -2 }
        );
        assert_eq!(HistoryCapacity::default(), HistoryCapacity::Bounded(10));
    }

    #[test]
    fn zero_capacity_keeps_current_record() {
        let mut history = History::new(HistoryCapacity::Bounded(0));
        push_n(&mut history, 3);
        assert_eq!(history.len(), 1);
        let only = history.last().unwrap();
        assert_eq!(only.n, 2);
        assert!(only.prev.read().unwrap().is_none());
    }

    #[test]
    fn truncation_unlinks_oldest() {
        let mut history = History::new(HistoryCapacity::Bounded(3));
        push_n(&mut history, 5);
        let window = history.snapshot();
        assert_eq!(window.iter().map(|r| r.n).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(window[0].prev.read().unwrap().is_none());
        assert!(Arc::ptr_eq(window[2].prev.read().unwrap().as_ref().unwrap(), &window[1]));
    }

    #[test]
    fn no_truncation_keeps_first_link_absent() {
        let mut history = History::new(HistoryCapacity::Bounded(3));
        push_n(&mut history, 2);
        let window = history.snapshot();
        assert!(window[0].prev.read().unwrap().is_none());
        assert!(window[1].prev.read().unwrap().is_some());
    }

    #[test]
    fn unbounded_never_truncates() {
        let mut history = History::new(HistoryCapacity::Unbounded);
        push_n(&mut history, 50);
        assert_eq!(history.len(), 50);
        assert_eq!(history.iter().next().unwrap().n, 0);
    }
}
