//! The `ConsumerIntrospector` substitute (spec.md §9, Design Notes option
//! "c"): an explicit builder API replacing annotation/reflection scanning.
//! A target type implements [`RegisterConsumers`] to declare, via
//! [`ConsumerBuilder`], the `(eventType, fn, mode, priority, sticky)` tuples
//! it wants registered. `Bus::register` never knows whether the descriptors
//! came from hand-written code, a derive macro, or a build script.

use std::any::{Any, TypeId};
use std::sync::Arc;

use crate::consumer::{ConsumerFn, ThreadMode};

/// One not-yet-registered consumer entry, produced by [`ConsumerBuilder`].
pub struct PendingConsumer {
    pub event_type: TypeId,
    pub event_type_name: &'static str,
    pub thread_mode: ThreadMode,
    pub priority: i32,
    pub sticky: bool,
    pub invoke: Arc<ConsumerFn>,
}

/// Implemented by any type that wants to register consumer methods on a
/// [`crate::bus::EventBus`]. `self: Arc<Self>` lets the descriptors' closures
/// capture a live reference back to the target without cloning it per entry.
pub trait RegisterConsumers: Send + Sync + 'static {
    fn consumer_descriptors(self: Arc<Self>) -> Vec<PendingConsumer>;
}

/// Builds the `Vec<PendingConsumer>` a [`RegisterConsumers`] impl returns.
///
/// ```ignore
/// impl RegisterConsumers for MyWidget {
///     fn consumer_descriptors(self: Arc<Self>) -> Vec<PendingConsumer> {
///         ConsumerBuilder::new(self)
///             .on::<TickEvent>(ThreadMode::Posting, 0, false, |w, e| w.on_tick(e))
///             .on::<ResizeEvent>(ThreadMode::Main, 10, true, |w, e| w.on_resize(e))
///             .build()
///     }
/// }
/// ```
pub struct ConsumerBuilder<T: Send + Sync + 'static> {
    target: Arc<T>,
    entries: Vec<PendingConsumer>,
}

impl<T: Send + Sync + 'static> ConsumerBuilder<T> {
    pub fn new(target: Arc<T>) -> Self {
        Self {
            target,
            entries: Vec::new(),
        }
    }

    pub fn on<P>(
        mut self,
        thread_mode: ThreadMode,
        priority: i32,
        sticky: bool,
        handler: impl Fn(&T, &P) + Send + Sync + 'static,
    ) -> Self
    where
        P: Any + Send + Sync + 'static,
    {
        let target = self.target.clone();
        let invoke: Arc<ConsumerFn> = Arc::new(move |payload: &(dyn Any + Send + Sync)| {
            if let Some(p) = payload.downcast_ref::<P>() {
                handler(&target, p);
            }
        });
        self.entries.push(PendingConsumer {
            event_type: TypeId::of::<P>(),
            event_type_name: std::any::type_name::<P>(),
            thread_mode,
            priority,
            sticky,
            invoke,
        });
        self
    }

    pub fn build(self) -> Vec<PendingConsumer> {
        self.entries
    }
}
