use dashmap::DashMap;

use rplc_types::JobId;

/// Process-local advisory lock over `(database_family, chunk)` pairs
/// (spec.md §4.5). Jobs acquire a lock non-blockingly before submitting
/// Requests that mutate a chunk; a failed acquisition causes the planner
/// to skip the chunk for the current iteration rather than fail the job.
///
/// This is explicitly *not* a cluster-wide primitive (spec.md §9's design
/// note): it only prevents two Jobs within the same Controller process
/// from racing on the same chunk.
#[derive(Debug, Default)]
pub struct ChunkLockRegistry {
    locks: DashMap<(String, u32), JobId>,
}

impl ChunkLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock for `(family, chunk)` on behalf of
    /// `owner`. Returns `true` on success; `false` if some other job
    /// already holds it (spec.md §8's "chunk-lock exclusion" invariant:
    /// at no instant do two mutating jobs hold the same `(family, chunk)`
    /// lock).
    pub fn try_acquire(&self, family: &str, chunk: u32, owner: JobId) -> bool {
        match self.locks.entry((family.to_string(), chunk)) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(owner);
                true
            }
        }
    }

    /// Releases the lock for `(family, chunk)` iff it is currently held
    /// by `owner`. Releasing a lock you don't own is a no-op — a job
    /// finishing after being pre-empted elsewhere must never release
    /// someone else's lock.
    pub fn release(&self, family: &str, chunk: u32, owner: JobId) {
        self.locks.remove_if(&(family.to_string(), chunk), |_, held_by| *held_by == owner);
    }

    /// Releases every lock held by `owner`. Called from a job's
    /// completion path (spec.md §5's "shortest span that covers all
    /// Requests for that chunk within one Job" policy).
    pub fn release_all(&self, owner: JobId) {
        self.locks.retain(|_, held_by| *held_by != owner);
    }

    pub fn owner(&self, family: &str, chunk: u32) -> Option<JobId> {
        self.locks.get(&(family.to_string(), chunk)).map(|v| *v)
    }

    pub fn is_locked(&self, family: &str, chunk: u32) -> bool {
        self.locks.contains_key(&(family.to_string(), chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_until_released() {
        let registry = ChunkLockRegistry::new();
        let owner_a = JobId::new();
        let owner_b = JobId::new();

        assert!(registry.try_acquire("family", 7, owner_a));
        assert!(!registry.try_acquire("family", 7, owner_b));

        registry.release("family", 7, owner_a);
        assert!(registry.try_acquire("family", 7, owner_b));
    }

    #[test]
    fn release_by_non_owner_is_a_no_op() {
        let registry = ChunkLockRegistry::new();
        let owner_a = JobId::new();
        let owner_b = JobId::new();

        assert!(registry.try_acquire("family", 7, owner_a));
        registry.release("family", 7, owner_b);
        assert!(registry.is_locked("family", 7));
    }

    #[test]
    fn release_all_frees_every_chunk_for_owner() {
        let registry = ChunkLockRegistry::new();
        let owner = JobId::new();
        registry.try_acquire("family", 1, owner);
        registry.try_acquire("family", 2, owner);
        registry.release_all(owner);
        assert!(!registry.is_locked("family", 1));
        assert!(!registry.is_locked("family", 2));
    }
}
