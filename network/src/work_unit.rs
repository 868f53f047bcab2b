//! Work units: one record per distinct received payload.
//!
//! The same transaction usually arrives from several neighbors at about the
//! same time. Only the first receipt hashes and validates it; the others
//! attach to the same unit and are answered once the result is known.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tangle_protocol::{legacy, ParsedTransaction};
use tangle_store::TransactionStore;
use tangle_types::Hash;

use crate::broadcast::Broadcast;
use crate::peer::{Peer, PeerMetrics};
use crate::request_queue::RequestQueue;

/// Processing outcome of a work unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkUnitState {
    Hashing,
    Invalid,
    Hashed,
}

/// A neighbor that delivered this payload, and what it asked for in return.
#[derive(Clone, Debug)]
pub struct PeerRequest {
    pub peer: Arc<Peer>,
    /// Legacy peers piggyback a request for another transaction.
    pub requested_hash: Option<Hash>,
    replied: bool,
}

#[derive(Default)]
struct Inner {
    state: Option<WorkUnitState>,
    transaction: Option<Arc<ParsedTransaction>>,
    requests: Vec<PeerRequest>,
}

pub struct WorkUnit {
    payload: Vec<u8>,
    inner: Mutex<Inner>,
}

impl WorkUnit {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `None` until processing starts.
    pub fn state(&self) -> Option<WorkUnitState> {
        self.lock().state
    }

    pub fn is(&self, state: WorkUnitState) -> bool {
        self.lock().state == Some(state)
    }

    pub fn update_state(&self, state: WorkUnitState) {
        self.lock().state = Some(state);
    }

    /// Claim the unit for hashing. Fails with the current state if another
    /// receipt already claimed it.
    pub fn begin_hashing(&self) -> Result<(), WorkUnitState> {
        let mut inner = self.lock();
        match inner.state {
            Some(state) => Err(state),
            None => {
                inner.state = Some(WorkUnitState::Hashing);
                Ok(())
            }
        }
    }

    /// Store the parsed transaction and mark the unit hashed.
    pub fn set_hashed(&self, transaction: Arc<ParsedTransaction>) {
        let mut inner = self.lock();
        inner.transaction = Some(transaction);
        inner.state = Some(WorkUnitState::Hashed);
    }

    pub fn transaction(&self) -> Option<Arc<ParsedTransaction>> {
        self.lock().transaction.clone()
    }

    pub fn add_request(&self, peer: Arc<Peer>, requested_hash: Option<Hash>) {
        self.lock().requests.push(PeerRequest {
            peer,
            requested_hash,
            replied: false,
        });
    }

    pub fn requests(&self) -> Vec<PeerRequest> {
        self.lock().requests.clone()
    }

    /// Answer every legacy request not answered yet. Returns the number of
    /// messages queued.
    ///
    /// A peer that asked for this very transaction is in sync with us; it
    /// only gets a message when we have a request of our own to piggyback,
    /// carried on the genesis transaction.
    pub fn reply_to_all_requests<S>(&self, request_queue: &RequestQueue, store: &S) -> usize
    where
        S: TransactionStore + ?Sized,
    {
        let (unit_hash, to_answer) = {
            let mut inner = self.lock();
            let Some(unit_hash) = inner.transaction.as_ref().map(|tx| tx.hash) else {
                return 0;
            };
            let mut to_answer = Vec::new();
            for request in inner.requests.iter_mut().filter(|r| !r.replied) {
                request.replied = true;
                if let Some(requested) = request.requested_hash {
                    to_answer.push((Arc::clone(&request.peer), requested));
                }
            }
            (unit_hash, to_answer)
        };

        let mut sent = 0;
        for (peer, requested) in to_answer {
            let synced = requested == unit_hash;
            let own_request = request_queue.next();
            if synced && own_request.is_none() {
                continue;
            }

            let wanted = if synced { None } else { lookup(store, &requested) };
            let transaction = match wanted {
                Some(tx) => tx,
                None if own_request.is_none() => continue,
                None => match lookup(store, &Hash::NULL) {
                    Some(genesis) => genesis,
                    None => {
                        tracing::error!("genesis transaction is missing from storage");
                        continue;
                    }
                },
            };

            let request_hash = own_request.map(|r| r.hash).unwrap_or(transaction.hash);
            match legacy::build_transaction_and_request(&transaction.raw_bytes, &request_hash) {
                Ok(message) => {
                    if peer.enqueue_for_sending(message) {
                        sent += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %peer.id(), error = %e, "cannot build reply");
                }
            }
        }
        sent
    }

    /// Count an invalid transaction against every peer that sent it.
    pub fn punish(&self) {
        self.for_each_peer(|metrics| &metrics.invalid_transactions);
    }

    /// Count a stale transaction against every peer that sent it.
    pub fn stale(&self) {
        self.for_each_peer(|metrics| &metrics.stale_transactions);
    }

    /// A broadcast of this payload to everyone who didn't send it to us.
    pub fn broadcast(&self) -> Broadcast {
        let inner = self.lock();
        Broadcast {
            payload: self.payload.clone(),
            requested_hash: inner.transaction.as_ref().map(|tx| tx.hash),
            exclude: inner.requests.iter().map(|r| r.peer.id()).collect(),
        }
    }

    fn for_each_peer(&self, counter: impl Fn(&PeerMetrics) -> &AtomicU64) {
        for request in &self.lock().requests {
            PeerMetrics::incr(counter(&request.peer.metrics));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lookup<S>(store: &S, hash: &Hash) -> Option<Arc<tangle_store::StoredTransaction>>
where
    S: TransactionStore + ?Sized,
{
    match store.get_transaction(hash) {
        Ok(tx) => tx,
        Err(e) => {
            tracing::warn!(%hash, error = %e, "transaction lookup failed");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Content-addressed registry of live work units.
#[derive(Default)]
pub struct WorkUnitCache {
    units: Mutex<HashMap<Vec<u8>, Arc<WorkUnit>>>,
}

impl WorkUnitCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The unit for `payload`, created on first sight.
    pub fn acquire(self: &Arc<Self>, payload: &[u8]) -> CachedWorkUnit {
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        let unit = units
            .entry(payload.to_vec())
            .or_insert_with(|| Arc::new(WorkUnit::new(payload.to_vec())));
        CachedWorkUnit {
            cache: Arc::clone(self),
            unit: Some(Arc::clone(unit)),
        }
    }

    pub fn len(&self) -> usize {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to a cached work unit. The unit leaves the cache when its last
/// handle is dropped.
pub struct CachedWorkUnit {
    cache: Arc<WorkUnitCache>,
    unit: Option<Arc<WorkUnit>>,
}

impl Deref for CachedWorkUnit {
    type Target = WorkUnit;

    fn deref(&self) -> &WorkUnit {
        // Only `drop` takes the unit out.
        self.unit.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for CachedWorkUnit {
    fn drop(&mut self) {
        let mut units = self
            .cache
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(unit) = self.unit.take() {
            // The cache holds one reference, this handle the other.
            if Arc::strong_count(&unit) == 2 {
                units.remove(unit.payload());
            }
            drop(unit);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
