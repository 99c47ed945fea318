//! The consumer descriptor: `(method-handle, declared-event-type, thread-mode,
//! priority, sticky, active)` from spec.md §3, expressed without runtime
//! reflection — the "method-handle" is a boxed, type-erased closure built by
//! [`crate::introspect::ConsumerBuilder`].

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marker blanket trait standing in for "any payload type", as in the
/// teacher's `EventPayload`.
pub trait EventPayload: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> EventPayload for T {}

/// A type-erased invocable taking `&payload`. Registered once per descriptor
/// and shared (via `Arc`) across every queue node it is ever enqueued onto.
pub type ConsumerFn = dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync;

/// Which dispatcher a consumer's method runs on. See spec.md §4.3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThreadMode {
    /// Invoke inline on the producer's thread.
    Posting,
    /// Invoke on the host main/UI thread; inline if already there.
    Main,
    /// Invoke on the host main/UI thread; always hops, even from there.
    MainOrdered,
    /// Invoke serialised on a single shared background worker.
    Background,
    /// Invoke on the executor with unbounded fan-out.
    Async,
}

/// A single registered consumer. Cheap to clone: every field is either
/// `Copy` or an `Arc`.
#[derive(Clone)]
pub struct ConsumerDescriptor {
    /// Identity of the registration's owning target (the address of the
    /// `Arc` it was registered through). Used for duplicate detection and
    /// teardown, standing in for the spec's "target-instance" identity.
    pub target_id: u64,
    pub event_type: TypeId,
    pub event_type_name: &'static str,
    pub thread_mode: ThreadMode,
    pub priority: i32,
    pub sticky: bool,
    pub active: Arc<AtomicBool>,
    pub invoke: Arc<ConsumerFn>,
}

impl ConsumerDescriptor {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Flips `active` false. Per spec.md §3 this transition happens exactly
    /// once and never reverses.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}
