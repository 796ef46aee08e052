use std::collections::BTreeMap;
use std::sync::mpsc::Sender;
use std::time::Instant;

use parking_lot::Mutex;

use rplc_wire::Response;

/// A request awaiting its worker's reply.
struct PendingEntry {
    worker: String,
    sender: Sender<Response>,
    deadline: Option<Instant>,
}

/// Demultiplexes worker responses back to their originating caller by
/// request id, and drives expiration of requests that exceed their
/// timeout (spec.md §4.1/§4.2's per-request timer).
///
/// Modeled as a coarse timer wheel: pending deadlines are bucketed by
/// instant in a `BTreeMap` so `next_deadline`/`expire_due` never need to
/// scan the full pending set.
#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<std::collections::HashMap<String, PendingEntry>>,
    wheel: Mutex<BTreeMap<Instant, Vec<String>>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, request_id: String, worker: String, sender: Sender<Response>, deadline: Option<Instant>) {
        if let Some(deadline) = deadline {
            self.wheel.lock().entry(deadline).or_default().push(request_id.clone());
        }
        self.entries.lock().insert(request_id, PendingEntry { worker, sender, deadline });
    }

    /// Resolves a response to its waiting caller. No-op if the request was
    /// already cancelled, expired, or is unknown (e.g. a stray reply after
    /// a reconnect).
    pub fn resolve(&self, response: Response) {
        let entry = self.entries.lock().remove(&response.id);
        if let Some(entry) = entry {
            let _ = entry.sender.send(response);
        }
    }

    /// Removes and returns the request, if still pending, without
    /// notifying its caller (the caller already knows: it initiated the
    /// cancellation).
    pub fn cancel(&self, request_id: &str) -> bool {
        self.entries.lock().remove(request_id).is_some()
    }

    /// Drops every pending entry belonging to `worker`, e.g. on a
    /// connection reset that the messenger chooses not to transparently
    /// retry.
    pub fn drop_worker(&self, worker: &str) -> Vec<String> {
        let mut entries = self.entries.lock();
        let dropped: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.worker == worker)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dropped {
            entries.remove(id);
        }
        dropped
    }

    /// The next instant at which some pending request will expire, used to
    /// bound the event loop's `poll` timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.wheel.lock().keys().next().copied()
    }

    /// Expires every request whose deadline has passed as of `now`,
    /// returning their ids so the caller can notify each sender.
    pub fn expire_due(&self, now: Instant) -> Vec<String> {
        let due: Vec<Instant> = {
            let wheel = self.wheel.lock();
            wheel.range(..=now).map(|(k, _)| *k).collect()
        };
        let mut expired = Vec::new();
        let mut wheel = self.wheel.lock();
        let mut entries = self.entries.lock();
        for instant in due {
            if let Some(ids) = wheel.remove(&instant) {
                for id in ids {
                    if entries.remove(&id).is_some() {
                        expired.push(id);
                    }
                }
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn sample_response(id: &str) -> Response {
        Response {
            id: id.to_string(),
            status: rplc_wire::ResponseStatus::Success,
            status_ext: rplc_wire::ResponseStatusExt::None,
            performance: Default::default(),
            target_performance: None,
            replica: None,
            replicas: None,
            echo_data: None,
        }
    }

    #[test]
    fn resolve_delivers_to_waiting_sender() {
        let registry = PendingRegistry::new();
        let (tx, rx) = channel();
        registry.insert("r1".to_string(), "w1".to_string(), tx, None);
        registry.resolve(sample_response("r1"));
        assert_eq!(rx.recv().unwrap().id, "r1");
    }

    #[test]
    fn cancel_prevents_later_resolution() {
        let registry = PendingRegistry::new();
        let (tx, rx) = channel();
        registry.insert("r1".to_string(), "w1".to_string(), tx, None);
        assert!(registry.cancel("r1"));
        registry.resolve(sample_response("r1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn expire_due_only_removes_past_deadlines() {
        let registry = PendingRegistry::new();
        let (tx, _rx) = channel();
        let now = Instant::now();
        registry.insert("past".to_string(), "w1".to_string(), tx.clone(), Some(now - Duration::from_secs(1)));
        registry.insert("future".to_string(), "w1".to_string(), tx, Some(now + Duration::from_secs(60)));

        let expired = registry.expire_due(now);
        assert_eq!(expired, vec!["past".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn drop_worker_removes_only_its_entries() {
        let registry = PendingRegistry::new();
        let (tx, _rx) = channel();
        registry.insert("a".to_string(), "w1".to_string(), tx.clone(), None);
        registry.insert("b".to_string(), "w2".to_string(), tx, None);
        let dropped = registry.drop_worker("w1");
        assert_eq!(dropped, vec!["a".to_string()]);
        assert_eq!(registry.len(), 1);
    }
}
