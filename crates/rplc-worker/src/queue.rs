use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::request::WorkerRequest;

struct QueueEntry {
    priority: i32,
    arrival: Instant,
    request: Arc<WorkerRequest>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.arrival == other.arrival
    }
}
impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; for equal priority, earlier arrival first
        // (spec.md §4.3: "queues incoming requests by (priority, arrival)").
        // `BinaryHeap` is a max-heap, so arrival order is reversed to make
        // the earliest arrival compare greatest.
        self.priority.cmp(&other.priority).then_with(|| other.arrival.cmp(&self.arrival))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The worker's `(priority, arrival)` request queue (spec.md §4.3).
#[derive(Default)]
pub struct RequestQueue {
    heap: Mutex<BinaryHeap<QueueEntry>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, request: Arc<WorkerRequest>, priority: i32) {
        self.heap.lock().push(QueueEntry { priority, arrival: Instant::now(), request });
    }

    pub fn pop(&self) -> Option<Arc<WorkerRequest>> {
        self.heap.lock().pop().map(|entry| entry.request)
    }

    /// Re-enqueues a request whose `execute()` call returned `false`
    /// (cooperative yield, spec.md §4.3), preserving its original
    /// priority but refreshing its arrival so it doesn't starve requests
    /// that genuinely just arrived — it cycles to the back of its
    /// priority band rather than the absolute front.
    pub fn reschedule(&self, request: Arc<WorkerRequest>, priority: i32) {
        self.push(request, priority);
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ExtendedState;
    use rplc_wire::QueuedType;

    fn sample_request(id: &str) -> Arc<WorkerRequest> {
        Arc::new(WorkerRequest::new(id.to_string(), QueuedType::TestEcho, "w1".to_string()))
    }

    #[test]
    fn higher_priority_pops_first() {
        let queue = RequestQueue::new();
        queue.push(sample_request("low"), 1);
        queue.push(sample_request("high"), 10);
        assert_eq!(queue.pop().unwrap().id, "high");
        assert_eq!(queue.pop().unwrap().id, "low");
    }

    #[test]
    fn equal_priority_is_fifo() {
        let queue = RequestQueue::new();
        queue.push(sample_request("first"), 5);
        std::thread::sleep(std::time::Duration::from_millis(1));
        queue.push(sample_request("second"), 5);
        assert_eq!(queue.pop().unwrap().id, "first");
        assert_eq!(queue.pop().unwrap().id, "second");
    }

    #[test]
    fn fresh_request_starts_queued() {
        let req = sample_request("r");
        assert_eq!(req.extended_state(), ExtendedState::Queued);
    }
}
