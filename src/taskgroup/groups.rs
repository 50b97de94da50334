//! Per-group admission bookkeeping.
//!
//! A group admits work while fewer than `limit` items are pending or
//! running; anything beyond waits in a FIFO queue. Each released slot admits
//! at most one waiter, so the limit holds at every instant.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::metrics;

/// Outcome of [`TaskGroups::admit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    /// A slot was free; run the item now.
    Run(T),
    /// The group is full; the item waits in the group's queue.
    Queued,
}

/// Snapshot of one group's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Concurrency limit fixed when the group record was created.
    pub limit: usize,
    /// Items admitted but not yet started.
    pub pending: usize,
    /// Items currently running.
    pub in_flight: usize,
    /// Items waiting for a slot.
    pub waiting: usize,
}

struct Group<T> {
    limit: usize,
    pending: usize,
    in_flight: usize,
    queue: VecDeque<T>,
}

impl<T> Group<T> {
    fn occupied(&self) -> usize { self.pending + self.in_flight }

    fn is_idle(&self) -> bool { self.occupied() == 0 && self.queue.is_empty() }
}

/// Admission table for named task groups.
///
/// All operations take one short-lived lock; no user code runs under it.
///
/// ```
/// use wirechain::taskgroup::{Admission, TaskGroups};
///
/// let groups = TaskGroups::new();
/// assert_eq!(groups.admit("db", 1, "a"), Admission::Run("a"));
/// assert_eq!(groups.admit("db", 1, "b"), Admission::Queued);
/// groups.start("db");
/// assert_eq!(groups.complete("db"), Some("b"));
/// ```
pub struct TaskGroups<T> {
    groups: Mutex<HashMap<String, Group<T>>>,
}

impl<T> Default for TaskGroups<T> {
    fn default() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> TaskGroups<T> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Group<T>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `item` into `name`, creating the group with `limit` if absent.
    ///
    /// The limit of an existing group is never changed. An admitted item
    /// counts as pending until [`TaskGroups::start`] is called for it.
    pub fn admit(&self, name: &str, limit: usize, item: T) -> Admission<T> {
        let mut groups = self.lock();
        let group = groups.entry(name.to_owned()).or_insert_with(|| Group {
            limit: limit.max(1),
            pending: 0,
            in_flight: 0,
            queue: VecDeque::new(),
        });
        if group.occupied() < group.limit {
            group.pending += 1;
            Admission::Run(item)
        } else {
            group.queue.push_back(item);
            metrics::set_group_queued(name, group.queue.len());
            Admission::Queued
        }
    }

    /// Move one admitted item of `name` from pending to running.
    pub fn start(&self, name: &str) {
        if let Some(group) = self.lock().get_mut(name) {
            if group.pending > 0 {
                group.pending -= 1;
                group.in_flight += 1;
            }
        }
    }

    /// Release the slot of a finished item and admit at most one waiter.
    ///
    /// The returned waiter is already counted as pending.
    pub fn complete(&self, name: &str) -> Option<T> { self.release(name, true) }

    /// Release the slot of an item that was admitted but never started.
    pub fn abandon(&self, name: &str) -> Option<T> { self.release(name, false) }

    fn release(&self, name: &str, started: bool) -> Option<T> {
        let mut groups = self.lock();
        let group = groups.get_mut(name)?;
        let counter = if started {
            &mut group.in_flight
        } else {
            &mut group.pending
        };
        *counter = counter.saturating_sub(1);
        let next = if group.occupied() < group.limit {
            group.queue.pop_front()
        } else {
            None
        };
        if next.is_some() {
            group.pending += 1;
            metrics::set_group_queued(name, group.queue.len());
        }
        if group.is_idle() {
            groups.remove(name);
        }
        next
    }

    /// Counters for `name`, or `None` once its record has been discarded.
    #[must_use]
    pub fn stats(&self, name: &str) -> Option<GroupStats> {
        self.lock().get(name).map(|g| GroupStats {
            limit: g.limit,
            pending: g.pending,
            in_flight: g.in_flight,
            waiting: g.queue.len(),
        })
    }

    /// Number of live group records.
    #[must_use]
    pub fn len(&self) -> usize { self.lock().len() }

    /// Whether no group record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }
}

impl<T> std::fmt::Debug for TaskGroups<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroups")
            .field("groups", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[test]
    fn waiters_are_admitted_in_fifo_order() {
        let groups = TaskGroups::new();
        let mut order = Vec::new();
        for item in ["A", "B", "C"] {
            if let Admission::Run(item) = groups.admit("g", 1, item) {
                order.push(item);
            }
        }
        assert_eq!(order, ["A"]);
        groups.start("g");
        while let Some(next) = groups.complete("g") {
            order.push(next);
            groups.start("g");
        }
        assert_eq!(order, ["A", "B", "C"]);
        assert!(groups.is_empty(), "idle group record is discarded");
    }

    #[test]
    fn limit_is_fixed_at_creation() {
        let groups = TaskGroups::new();
        assert_eq!(groups.admit("g", 1, 1), Admission::Run(1));
        assert_eq!(groups.admit("g", 5, 2), Admission::Queued);
        assert_eq!(groups.stats("g").map(|s| s.limit), Some(1));
    }

    #[rstest]
    #[case::started(true)]
    #[case::abandoned(false)]
    fn release_admits_exactly_one_waiter(#[case] started: bool) {
        let groups = TaskGroups::new();
        for i in 0..2 {
            assert_eq!(groups.admit("g", 2, i), Admission::Run(i));
        }
        for i in 2..5 {
            assert_eq!(groups.admit("g", 2, i), Admission::Queued);
        }
        let next = if started {
            groups.start("g");
            groups.complete("g")
        } else {
            groups.abandon("g")
        };
        assert_eq!(next, Some(2));
        let stats = groups.stats("g").expect("live group");
        assert_eq!(stats.pending + stats.in_flight, 2);
        assert_eq!(stats.waiting, 2);
    }

    #[test]
    fn unknown_group_release_is_a_no_op() {
        let groups = TaskGroups::<u8>::new();
        assert_eq!(groups.complete("missing"), None);
        assert!(groups.stats("missing").is_none());
    }

    proptest! {
        #[test]
        fn occupancy_never_exceeds_limit(
            limit in 1usize..4,
            ops in proptest::collection::vec(any::<bool>(), 1..64),
        ) {
            let groups = TaskGroups::new();
            let mut running = 0usize;
            for (i, admit) in ops.into_iter().enumerate() {
                if admit {
                    if let Admission::Run(_) = groups.admit("g", limit, i) {
                        groups.start("g");
                        running += 1;
                    }
                } else if running > 0 {
                    running -= 1;
                    if groups.complete("g").is_some() {
                        groups.start("g");
                        running += 1;
                    }
                }
                prop_assert!(running <= limit);
                let stats = groups.stats("g").unwrap_or_default();
                prop_assert_eq!(stats.in_flight, running);
                prop_assert_eq!(stats.pending, 0);
            }
        }
    }
}
