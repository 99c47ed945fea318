//! The sticky cache: "event type -> most-recent payload of that exact type"
//! (spec.md §3), serialised on its own lock independent of the registry lock
//! as the spec requires ("Writes are serialised on a sticky-specific lock").

use std::any::{Any, TypeId};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::type_id::TypeHierarchyCache;

pub struct StickyCache {
    entries: Mutex<std::collections::HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl StickyCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn put(&self, type_id: TypeId, payload: Arc<dyn Any + Send + Sync>) {
        self.entries.lock().insert(type_id, payload);
    }

    pub fn get(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.lock().get(&type_id).cloned()
    }

    pub fn remove(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.lock().remove(&type_id)
    }

    pub fn remove_all(&self) {
        self.entries.lock().clear();
    }

    /// Resolves the spec's §9 open question: `removeStickyIfEquals` reads
    /// the cache by `value`'s own type and removes it only if the stored
    /// entry is `PartialEq`-equal to `value` — a compare-by-type-and-equals,
    /// not the source's instance-identity bug. See DESIGN.md.
    pub fn remove_if_equals<T>(&self, value: &T) -> bool
    where
        T: Any + Send + Sync + PartialEq,
    {
        let type_id = TypeId::of::<T>();
        let mut entries = self.entries.lock();
        let matches = entries
            .get(&type_id)
            .and_then(|stored| stored.downcast_ref::<T>())
            .map(|stored| stored == value)
            .unwrap_or(false);
        if matches {
            entries.remove(&type_id);
        }
        matches
    }

    /// All sticky entries whose own type widens (via `hierarchy`) to
    /// `declared_type` — i.e. every cached payload assignable to the
    /// consumer's declared parameter type. Used for sticky replay on
    /// registration with inheritance enabled (spec.md §4.4 step 2e).
    pub fn assignable_to(
        &self,
        declared_type: TypeId,
        hierarchy: &TypeHierarchyCache,
    ) -> Vec<Arc<dyn Any + Send + Sync>> {
        self.entries
            .lock()
            .iter()
            .filter(|(stored_type, _)| hierarchy.widen(**stored_type).contains(&declared_type))
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Default for StickyCache {
    fn default() -> Self {
        Self::new()
    }
}
