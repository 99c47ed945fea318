//! `Registry` (spec.md §3, §4.4): the three mappings —
//! `consumersByEventType`, `typesByTarget`, `stickyCache` — plus the
//! `TypeHierarchyCache`-driven widened membership test behind
//! `hasConsumerFor`.
//!
//! `consumersByEventType` is copy-on-write: each event type's list lives
//! behind an `arc_swap::ArcSwap`, mirroring `audio-system`'s
//! `ActiveSources`/`ArcSwapOption` pattern — readers load a snapshot `Arc`
//! and iterate it without holding any lock, while writers clone-mutate-swap.
//! An outer `parking_lot::RwLock` only guards *inserting a new event type key*
//! into the map; it is never held while iterating a snapshot.
//!
//! Callers are expected to serialise their own `insert`/`remove_target` calls
//! for a given `Registry` externally (the bus-level register lock described
//! in spec.md §4.4: "Under the bus lock, for each descriptor ..."). That
//! external serialisation is what makes the duplicate-registration check in
//! `insert` race-free; concurrent *readers* never need it.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::consumer::ConsumerDescriptor;
use crate::error::BusError;
use crate::type_id::TypeHierarchyCache;

pub struct Registration {
    /// Stable insertion order, used as the tie-break for equal priorities.
    pub seq: u64,
    pub descriptor: ConsumerDescriptor,
}

type Slot = Arc<ArcSwap<Vec<Arc<Registration>>>>;

pub struct Registry {
    by_type: RwLock<HashMap<TypeId, Slot>>,
    by_target: Mutex<HashMap<u64, Vec<TypeId>>>,
    seq: AtomicU64,
    channel_name: &'static str,
}

impl Registry {
    pub fn new(channel_name: &'static str) -> Self {
        Self {
            by_type: RwLock::new(HashMap::new()),
            by_target: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            channel_name,
        }
    }

    fn slot_for(&self, event_type: TypeId) -> Slot {
        if let Some(slot) = self.by_type.read().get(&event_type) {
            return slot.clone();
        }
        self.by_type
            .write()
            .entry(event_type)
            .or_insert_with(|| Arc::new(ArcSwap::from_pointee(Vec::new())))
            .clone()
    }

    fn slot_for_existing(&self, event_type: TypeId) -> Option<Slot> {
        self.by_type.read().get(&event_type).cloned()
    }

    /// Inserts a single descriptor, sorted into its type's list at the first
    /// index whose priority is strictly lower (non-increasing order,
    /// spec.md invariant #2). Fails if `target_id` already holds a
    /// registration for this exact event type.
    ///
    /// Callers must externally serialise concurrent `insert`/`remove_target`
    /// calls against the same `Registry` (see module docs).
    pub fn insert(&self, descriptor: ConsumerDescriptor) -> Result<Arc<Registration>, BusError> {
        let event_type = descriptor.event_type;
        let slot = self.slot_for(event_type);
        let current = slot.load();
        if current
            .iter()
            .any(|r| r.descriptor.target_id == descriptor.target_id)
        {
            return Err(BusError::AlreadyRegistered {
                channel: self.channel_name,
                type_name: descriptor.event_type_name,
            });
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let target_id = descriptor.target_id;
        let reg = Arc::new(Registration { seq, descriptor });

        let mut next: Vec<Arc<Registration>> = (**current).clone();
        let idx = next
            .iter()
            .position(|r| r.descriptor.priority < reg.descriptor.priority)
            .unwrap_or(next.len());
        next.insert(idx, reg.clone());
        slot.store(Arc::new(next));

        self.by_target
            .lock()
            .entry(target_id)
            .or_default()
            .push(event_type);

        Ok(reg)
    }

    /// Removes a single `(target, event_type)` registration, also pruning
    /// `event_type` out of `typesByTarget[target_id]` (dropping the key
    /// entirely once its list is empty). Used both by `remove_target` (whose
    /// own `by_target` removal already happened, so this is a no-op there)
    /// and by `Channel::register`'s rollback path, where it is the only
    /// place `by_target` gets cleaned up for a partially-inserted
    /// registration — without it, a rolled-back descriptor would leave a
    /// stale `event_type` entry in `typesByTarget[T]` with no matching
    /// registration in `consumersByEventType[E]`, violating spec.md §8
    /// invariant #1.
    pub fn remove_single(&self, target_id: u64, event_type: TypeId) {
        if let Some(slot) = self.slot_for_existing(event_type) {
            let current = slot.load();
            if let Some(reg) = current.iter().find(|r| r.descriptor.target_id == target_id) {
                reg.descriptor.deactivate();
            }
            let next: Vec<Arc<Registration>> = current
                .iter()
                .filter(|r| r.descriptor.target_id != target_id)
                .cloned()
                .collect();
            slot.store(Arc::new(next));
        }

        let mut by_target = self.by_target.lock();
        if let Some(types) = by_target.get_mut(&target_id) {
            types.retain(|&t| t != event_type);
            if types.is_empty() {
                by_target.remove(&target_id);
            }
        }
    }

    /// Removes every registration belonging to `target_id`, deactivating
    /// each one first so in-flight queued deliveries are dropped before
    /// invocation (spec.md §3 invariant: "active" flips true->false exactly
    /// once). Returns the event types the target had been registered for;
    /// empty if the target was unknown.
    pub fn remove_target(&self, target_id: u64) -> Vec<TypeId> {
        let types = self
            .by_target
            .lock()
            .remove(&target_id)
            .unwrap_or_default();
        for &event_type in &types {
            self.remove_single(target_id, event_type);
        }
        types
    }

    /// A lock-free snapshot of the consumer list for `event_type`, empty if
    /// none are registered.
    pub fn snapshot(&self, event_type: TypeId) -> Arc<Vec<Arc<Registration>>> {
        match self.slot_for_existing(event_type) {
            Some(slot) => slot.load_full(),
            None => Arc::new(Vec::new()),
        }
    }

    /// Widened membership test backing `Bus::hasConsumerFor` (spec.md §6).
    pub fn has_consumer_for(&self, event_type: TypeId, hierarchy: &TypeHierarchyCache, inheritance: bool) -> bool {
        if inheritance {
            hierarchy
                .widen(event_type)
                .iter()
                .any(|t| !self.snapshot(*t).is_empty())
        } else {
            !self.snapshot(event_type).is_empty()
        }
    }
}
