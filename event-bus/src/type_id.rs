//! `TypeHierarchyCache` (spec.md §4.1).
//!
//! Rust has no `getSuperclass`/`getInterfaces`; per the spec's own Design
//! Notes this is replaced with an explicit, application-supplied registry of
//! `(subtype -> Vec<supertype>)` edges, and the cache computes + memoizes the
//! transitive closure `[T, super_1, super_2, ...]` from those edges the first
//! time a type is queried, exactly as the spec describes.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub struct TypeHierarchyCache {
    /// Direct subtype -> supertype edges, in registration order.
    edges: RwLock<HashMap<TypeId, Vec<TypeId>>>,
    /// Memoized transitive closures, keyed by the type first queried.
    cache: RwLock<HashMap<TypeId, Arc<Vec<TypeId>>>>,
}

impl TypeHierarchyCache {
    pub fn new() -> Self {
        Self {
            edges: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Declare that `sub` widens to `sup`. Invalidates any memoized closure
    /// that could be affected; edges are normally registered once at startup,
    /// well before the first `widen` call, so this is a rare-path cost.
    pub fn register_edge(&self, sub: TypeId, sup: TypeId) {
        let mut edges = self.edges.write();
        let list = edges.entry(sub).or_default();
        if !list.contains(&sup) {
            list.push(sup);
        }
        drop(edges);
        self.cache.write().clear();
    }

    /// The complete, deduplicated, deterministic widening list for `t`:
    /// `[t, super_1, super_2, ...]` walked depth-first through registered
    /// edges. Computed lazily under a single lock the first time `t` is
    /// queried, then served from the memo table.
    pub fn widen(&self, t: TypeId) -> Arc<Vec<TypeId>> {
        if let Some(hit) = self.cache.read().get(&t) {
            return hit.clone();
        }
        let mut cache = self.cache.write();
        if let Some(hit) = cache.get(&t) {
            return hit.clone();
        }
        let computed = Arc::new(self.compute(t));
        cache.insert(t, computed.clone());
        computed
    }

    fn compute(&self, t: TypeId) -> Vec<TypeId> {
        let edges = self.edges.read();
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        self.walk(t, &edges, &mut out, &mut seen);
        out
    }

    fn walk(
        &self,
        t: TypeId,
        edges: &HashMap<TypeId, Vec<TypeId>>,
        out: &mut Vec<TypeId>,
        seen: &mut std::collections::HashSet<TypeId>,
    ) {
        if !seen.insert(t) {
            return;
        }
        out.push(t);
        if let Some(supers) = edges.get(&t) {
            for &s in supers {
                self.walk(s, edges, out, seen);
            }
        }
    }
}

impl Default for TypeHierarchyCache {
    fn default() -> Self {
        Self::new()
    }
}
