use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Process-local, bounded de-duplication cache for webhook transaction
/// references.
///
/// This is a fast-path short-circuit for repeat deliveries arriving
/// milliseconds apart, layered on top of the persistent duplicate check.
/// It is intentionally allowed to be cold after a restart and to diverge
/// across process instances; correctness never rests on it alone.
///
/// A `std::sync::Mutex` is fine here: the critical section is a map
/// lookup plus queue push and never spans an await point.
pub struct DedupCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "dedup cache capacity must be non-zero");
        Self {
            capacity,
            inner: Mutex::new(Inner {
                order: VecDeque::with_capacity(capacity + 1),
                seen: HashSet::with_capacity(capacity + 1),
            }),
        }
    }

    /// Records `reference` as seen. Returns `true` when this is the first
    /// sighting and the caller should proceed with reconciliation; `false`
    /// when the reference was already cached and processing must stop.
    ///
    /// Check and insert happen under one lock acquisition so two handlers
    /// racing on the same reference cannot both observe "unseen".
    pub fn check_and_insert(&self, reference: &str) -> bool {
        let mut inner = self.inner.lock().expect("dedup cache mutex poisoned");

        if inner.seen.contains(reference) {
            return false;
        }

        inner.seen.insert(reference.to_string());
        inner.order.push_back(reference.to_string());

        // Once over capacity, drop the oldest half and keep the newest
        // half, bounding memory without churning on every insert.
        if inner.order.len() > self.capacity {
            let drop_count = inner.order.len() / 2;
            for _ in 0..drop_count {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.seen.remove(&oldest);
                }
            }
        }

        true
    }

    /// Evicts `reference` so a later delivery reads as unseen again.
    ///
    /// Used when processing fails after the reference was marked: the
    /// provider will retry, and the retry must not be swallowed by the
    /// fast path while no order exists.
    pub fn remove(&self, reference: &str) {
        let mut inner = self.inner.lock().expect("dedup cache mutex poisoned");
        if inner.seen.remove(reference) {
            inner.order.retain(|r| r != reference);
        }
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.inner
            .lock()
            .expect("dedup cache mutex poisoned")
            .seen
            .contains(reference)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("dedup cache mutex poisoned")
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
