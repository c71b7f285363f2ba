//! Simulated-time event queue.
//!
//! Events are dispatched in scheduled-time order, ties broken by submission
//! sequence. A compound operation (merge, migration) is submitted as one
//! batch: its events execute strictly in order, each becoming eligible when
//! its predecessor completes. The queue never reorders within a batch.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use serde::{Deserialize, Serialize};

use nandsim_device::{Event, IoKind, Timing};

/// A dependent sequence of events sharing one submission slot.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Remaining events, front first.
    pub events: VecDeque<Event>,
    /// Earliest simulated time the front event may start.
    pub ready_at: f64,
    seq: u64,
}

impl PartialEq for Batch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Batch {}

impl PartialOrd for Batch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Batch {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, earliest (time, seq) must win.
        other
            .ready_at
            .total_cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Statistics for the event queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Total events accepted.
    pub enqueued: u64,
    /// Total batches accepted (an independent event counts as one).
    pub batches: u64,
    /// Total events dispatched.
    pub dispatched: u64,
}

impl SchedulerStats {
    /// Records a batch of `n` events entering the queue.
    #[inline]
    pub fn record_enqueue(&mut self, n: u64) {
        self.enqueued += n;
        self.batches += 1;
    }

    /// Records one event leaving the queue.
    #[inline]
    pub fn record_dispatch(&mut self) {
        self.dispatched += 1;
    }
}

/// Priority queue of event batches keyed by (ready time, submission seq).
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Batch>,
    next_seq: u64,
    stats: SchedulerStats,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits an independent event.
    pub fn push(&mut self, event: Event) {
        self.push_batch(vec![event]);
    }

    /// Submits a dependent sequence; it executes in order.
    pub fn push_batch(&mut self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let ready_at = events[0].start_time;
        self.stats.record_enqueue(events.len() as u64);
        self.heap.push(Batch {
            events: events.into(),
            ready_at,
            seq: self.next_seq,
        });
        self.next_seq += 1;
    }

    /// Takes the earliest batch.
    pub fn pop(&mut self) -> Option<Batch> {
        let batch = self.heap.pop();
        if batch.is_some() {
            self.stats.record_dispatch();
        }
        batch
    }

    /// Puts a partially executed batch back, keeping its submission slot.
    pub fn requeue(&mut self, batch: Batch) {
        debug_assert!(!batch.events.is_empty(), "requeued an empty batch");
        self.heap.push(batch);
    }

    /// Number of queued batches.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queue statistics.
    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

/// Service time of one operation, from the timing table.
///
/// Reads pay a control cycle, the cell read and (for host reads) the data
/// transfer; internal reads skip the transfer. Trims carry no device
/// latency.
pub fn service_time(kind: IoKind, timing: &Timing) -> f64 {
    match kind {
        IoKind::Read => timing.bus_ctrl_delay + timing.page_read_delay + timing.bus_data_delay,
        IoKind::ReadCommand => timing.bus_ctrl_delay + timing.page_read_delay,
        IoKind::Write => timing.bus_ctrl_delay + timing.bus_data_delay + timing.page_write_delay,
        IoKind::Erase => timing.bus_ctrl_delay + timing.block_erase_delay,
        IoKind::Trim => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue() {
        let mut queue = EventQueue::new();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_time_order() {
        let mut queue = EventQueue::new();
        queue.push(Event::read(1, 5.0));
        queue.push(Event::read(2, 1.0));
        queue.push(Event::read(3, 3.0));

        assert_eq!(queue.pop().unwrap().events[0].logical, 2);
        assert_eq!(queue.pop().unwrap().events[0].logical, 3);
        assert_eq!(queue.pop().unwrap().events[0].logical, 1);
    }

    #[test]
    fn test_submission_order_breaks_ties() {
        let mut queue = EventQueue::new();
        queue.push(Event::read(1, 2.0));
        queue.push(Event::read(2, 2.0));
        queue.push(Event::read(3, 2.0));

        assert_eq!(queue.pop().unwrap().events[0].logical, 1);
        assert_eq!(queue.pop().unwrap().events[0].logical, 2);
        assert_eq!(queue.pop().unwrap().events[0].logical, 3);
    }

    #[test]
    fn test_batch_stays_ordered() {
        let mut queue = EventQueue::new();
        queue.push_batch(vec![Event::read(1, 0.0), Event::read(2, 0.0)]);

        let mut batch = queue.pop().unwrap();
        assert_eq!(batch.events.pop_front().unwrap().logical, 1);
        batch.ready_at = 10.0;
        queue.requeue(batch);

        queue.push(Event::read(3, 5.0));
        assert_eq!(queue.pop().unwrap().events[0].logical, 3);
        assert_eq!(queue.pop().unwrap().events[0].logical, 2);
    }

    #[test]
    fn test_requeued_batch_wins_ties() {
        let mut queue = EventQueue::new();
        queue.push_batch(vec![Event::read(1, 0.0), Event::read(2, 0.0)]);
        let mut batch = queue.pop().unwrap();
        batch.events.pop_front();
        batch.ready_at = 4.0;
        queue.requeue(batch);

        // Submitted later, same ready time: the older batch goes first.
        queue.push(Event::read(3, 4.0));
        assert_eq!(queue.pop().unwrap().events[0].logical, 2);
    }

    #[test]
    fn test_stats() {
        let mut queue = EventQueue::new();
        queue.push(Event::read(1, 0.0));
        queue.push_batch(vec![Event::read(2, 0.0), Event::read(3, 0.0)]);
        assert_eq!(queue.stats().enqueued, 3);
        assert_eq!(queue.stats().batches, 2);

        queue.pop();
        assert_eq!(queue.stats().dispatched, 1);
    }

    #[test]
    fn test_service_times() {
        let timing = Timing::default();
        assert!(service_time(IoKind::Read, &timing) > service_time(IoKind::ReadCommand, &timing));
        assert!(service_time(IoKind::Erase, &timing) > service_time(IoKind::Write, &timing));
        assert_eq!(service_time(IoKind::Trim, &timing), 0.0);
    }
}
