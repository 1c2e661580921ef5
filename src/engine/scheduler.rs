//! Deterministic event queue
//!
//! A `BinaryHeap` with reversed ordering acts as a min-heap keyed by
//! `(time, event_id)`. Event ids increase strictly with insertion, so events
//! scheduled for the same instant pop in FIFO order. Cancellation marks an id
//! and the entry is discarded when it reaches the head of the queue.

use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

/// Strictly increasing event identifier, used as the FIFO tie-break
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Scheduled<E> {
    at: SimTime,
    id: EventId,
    event: E,
}

impl<E> PartialEq for Scheduled<E> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Scheduled<E> {
    // Reversed so the max-heap yields the earliest (time, id) first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler<E> {
    queue: BinaryHeap<Scheduled<E>>,
    cancelled: HashSet<EventId>,
    next_id: u64,
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            next_id: 0,
        }
    }

    /// Enqueue an event at an absolute virtual time
    pub fn schedule(&mut self, at: SimTime, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.queue.push(Scheduled { at, id, event });
        id
    }

    /// Cancel a pending event. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, id: EventId) -> bool {
        if id.0 >= self.next_id || !self.queue.iter().any(|s| s.id == id) {
            return false;
        }
        self.cancelled.insert(id)
    }

    /// Time of the next live event
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.queue.peek().map(|s| s.at)
    }

    /// Pop the next live event (earliest time, lowest id)
    pub fn pop_next(&mut self) -> Option<(SimTime, EventId, E)> {
        self.discard_cancelled();
        self.queue.pop().map(|s| (s.at, s.id, s.event))
    }

    /// Number of live pending events
    pub fn len(&self) -> usize {
        self.queue.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.cancelled.clear();
    }

    fn discard_cancelled(&mut self) {
        while let Some(head) = self.queue.peek() {
            if self.cancelled.remove(&head.id) {
                self.queue.pop();
            } else {
                break;
            }
        }
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_at_same_time() {
        let mut sched = Scheduler::new();
        sched.schedule(SimTime::from_millis(10), "first");
        sched.schedule(SimTime::from_millis(10), "second");
        sched.schedule(SimTime::from_millis(10), "third");

        let order: Vec<_> = std::iter::from_fn(|| sched.pop_next().map(|(_, _, e)| e)).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_time_ordering() {
        let mut sched = Scheduler::new();
        sched.schedule(SimTime::from_millis(30), "late");
        sched.schedule(SimTime::from_millis(10), "early");
        sched.schedule(SimTime::from_millis(20), "mid");

        let times: Vec<_> = std::iter::from_fn(|| sched.pop_next().map(|(t, _, _)| t)).collect();
        assert_eq!(
            times,
            vec![
                SimTime::from_millis(10),
                SimTime::from_millis(20),
                SimTime::from_millis(30)
            ]
        );
    }

    #[test]
    fn test_cancel() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(SimTime::from_millis(1), 'a');
        sched.schedule(SimTime::from_millis(2), 'b');
        assert_eq!(sched.len(), 2);

        assert!(sched.cancel(a));
        assert!(!sched.cancel(a), "double cancel");
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.peek_time(), Some(SimTime::from_millis(2)));
        assert_eq!(sched.pop_next().map(|(_, _, e)| e), Some('b'));
        assert!(sched.is_empty());
    }

    #[test]
    fn test_cancel_already_popped() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(SimTime::ZERO, ());
        sched.pop_next();
        assert!(!sched.cancel(a));
    }

    #[test]
    fn test_determinism_across_runs() {
        fn build() -> Vec<(SimTime, EventId, u32)> {
            let mut sched = Scheduler::new();
            for (i, t) in [5u64, 3, 5, 1, 3].iter().enumerate() {
                sched.schedule(SimTime::from_millis(*t), i as u32);
            }
            std::iter::from_fn(|| sched.pop_next()).collect()
        }
        assert_eq!(build(), build());
    }
}
