//! Priority queue of transactions we are missing.
//!
//! Requests are handed out lowest milestone index first, so that a node
//! catching up solidifies old milestones before new ones. A handed-out
//! request stays *pending* until the transaction arrives or the periodic
//! sweep puts it back into the queue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use tangle_types::{Hash, MilestoneIndex};

/// Number of latency samples averaged into one reported value.
const LATENCY_WINDOW: u64 = 100;

/// A request for a missing transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub hash: Hash,
    pub milestone_index: MilestoneIndex,
    pub enqueue_time: Instant,
    /// Keep the request across sweeps no matter how old it gets.
    pub prevent_discard: bool,
}

impl Request {
    pub fn new(hash: Hash, milestone_index: MilestoneIndex) -> Self {
        Self {
            hash,
            milestone_index,
            enqueue_time: Instant::now(),
            prevent_discard: false,
        }
    }

    pub fn with_prevent_discard(mut self) -> Self {
        self.prevent_discard = true;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Queued,
    Pending,
}

struct Slot {
    request: Request,
    state: SlotState,
}

/// Heap entry pointing at a queued slot.
struct QueuedEntry {
    milestone_index: MilestoneIndex,
    sequence: u64,
    hash: Hash,
}

impl Eq for QueuedEntry {}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.milestone_index == other.milestone_index && self.sequence == other.sequence
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the lowest index must compare greatest.
        other
            .milestone_index
            .cmp(&self.milestone_index)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Inner {
    /// Every known request, queued or pending, by hash.
    slots: HashMap<Hash, Slot>,
    /// Exactly the queued slots, ordered by milestone index.
    queue: BinaryHeap<QueuedEntry>,
    pending_count: usize,
    sequence: u64,
    latency_sum_ms: u64,
    latency_samples: u64,
}

impl Inner {
    fn push_queued(&mut self, hash: Hash, milestone_index: MilestoneIndex) {
        self.sequence += 1;
        self.queue.push(QueuedEntry {
            milestone_index,
            sequence: self.sequence,
            hash,
        });
    }

    fn mark_pending(&mut self, hash: &Hash) -> Option<Request> {
        let slot = self.slots.get_mut(hash)?;
        slot.state = SlotState::Pending;
        let request = slot.request.clone();
        self.pending_count += 1;
        Some(request)
    }
}

/// Thread-safe request queue. Every operation holds the lock only for the
/// map and heap update.
pub struct RequestQueue {
    inner: RwLock<Inner>,
    avg_latency_ms: AtomicU64,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            avg_latency_ms: AtomicU64::new(0),
        }
    }

    /// Queue `request`, stamping its enqueue time. Returns `false` if a
    /// request for the same hash is already queued or pending.
    pub fn enqueue(&self, mut request: Request) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.slots.contains_key(&request.hash) {
            return false;
        }
        request.enqueue_time = Instant::now();
        let (hash, milestone_index) = (request.hash, request.milestone_index);
        inner.slots.insert(
            hash,
            Slot {
                request,
                state: SlotState::Queued,
            },
        );
        inner.push_queued(hash, milestone_index);
        true
    }

    /// Pop the request with the lowest milestone index and mark it pending.
    pub fn next(&self) -> Option<Request> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.queue.pop()?;
        inner.mark_pending(&entry.hash)
    }

    /// Like [`next`](Self::next), but only for a request whose milestone
    /// index lies within `lowest..=highest`. Requests below the range stay
    /// queued.
    pub fn next_in_range(&self, lowest: MilestoneIndex, highest: MilestoneIndex) -> Option<Request> {
        if lowest > highest {
            return None;
        }
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = inner.queue.pop() {
            if entry.milestone_index < lowest {
                skipped.push(entry);
                continue;
            }
            if entry.milestone_index <= highest {
                found = Some(entry);
            } else {
                skipped.push(entry);
            }
            break;
        }
        for entry in skipped {
            inner.queue.push(entry);
        }
        let entry = found?;
        inner.mark_pending(&entry.hash)
    }

    /// The request [`next`](Self::next) would return, without taking it.
    pub fn peek(&self) -> Option<Request> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.queue.peek()?;
        inner.slots.get(&entry.hash).map(|slot| slot.request.clone())
    }

    /// The transaction for `hash` arrived. Removes and returns the pending
    /// request, if there was one, and records its latency.
    pub fn received(&self, hash: &Hash) -> Option<Request> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.slots.get(hash) {
            Some(slot) if slot.state == SlotState::Pending => {}
            _ => return None,
        }
        let request = inner.slots.remove(hash)?.request;
        inner.pending_count -= 1;

        let latency_ms = request.enqueue_time.elapsed().as_millis() as u64;
        inner.latency_sum_ms += latency_ms;
        inner.latency_samples += 1;
        if inner.latency_samples == LATENCY_WINDOW {
            self.avg_latency_ms
                .store(inner.latency_sum_ms / LATENCY_WINDOW, AtomicOrdering::Relaxed);
            inner.latency_sum_ms = 0;
            inner.latency_samples = 0;
        }
        if inner.pending_count == 0 {
            inner.latency_sum_ms = 0;
            inner.latency_samples = 0;
            self.avg_latency_ms.store(0, AtomicOrdering::Relaxed);
        }

        Some(request)
    }

    /// Move every pending request back into the queue. Unless
    /// `discard_older_than` is zero, requests older than it are dropped
    /// instead (except those marked `prevent_discard`). Returns the number
    /// of requests re-queued.
    pub fn enqueue_pending(&self, discard_older_than: Duration) -> usize {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();

        let pending: Vec<(Hash, MilestoneIndex, bool)> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.state == SlotState::Pending)
            .map(|(hash, slot)| {
                let expired = !discard_older_than.is_zero()
                    && !slot.request.prevent_discard
                    && now.duration_since(slot.request.enqueue_time) > discard_older_than;
                (*hash, slot.request.milestone_index, expired)
            })
            .collect();

        let mut requeued = 0;
        for (hash, milestone_index, expired) in pending {
            if expired {
                inner.slots.remove(&hash);
            } else {
                if let Some(slot) = inner.slots.get_mut(&hash) {
                    slot.state = SlotState::Queued;
                }
                inner.push_queued(hash, milestone_index);
                requeued += 1;
            }
        }
        inner.pending_count = 0;

        requeued
    }

    /// `(queued, pending)` counts.
    pub fn size(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        (inner.queue.len(), inner.pending_count)
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.slots.is_empty()
    }

    /// Copies of the queued and pending requests.
    pub fn requests(&self) -> (Vec<Request>, Vec<Request>) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut queued = Vec::with_capacity(inner.queue.len());
        let mut pending = Vec::with_capacity(inner.pending_count);
        for slot in inner.slots.values() {
            match slot.state {
                SlotState::Queued => queued.push(slot.request.clone()),
                SlotState::Pending => pending.push(slot.request.clone()),
            }
        }
        (queued, pending)
    }

    pub fn is_queued(&self, hash: &Hash) -> bool {
        self.state_of(hash) == Some(SlotState::Queued)
    }

    pub fn is_pending(&self, hash: &Hash) -> bool {
        self.state_of(hash) == Some(SlotState::Pending)
    }

    /// Moving average of request latency over the last full window.
    pub fn avg_latency(&self) -> Duration {
        Duration::from_millis(self.avg_latency_ms.load(AtomicOrdering::Relaxed))
    }

    fn state_of(&self, hash: &Hash) -> Option<SlotState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.slots.get(hash).map(|slot| slot.state)
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}
