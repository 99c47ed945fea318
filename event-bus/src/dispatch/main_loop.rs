//! `MainDispatcher` (spec.md §4.3, modes MAIN / MAIN_ORDERED).

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::consumer::ConsumerDescriptor;
use crate::main_loop::MainLoop;
use crate::queue::DeliveryQueue;

use super::Invoker;

/// Default ceiling on time spent draining per main-loop tick (spec.md §4.3:
/// "default 10ms") before the drain task reposts itself and yields, so a
/// burst of MAIN consumers never starves the main loop.
pub const DEFAULT_YIELD_AFTER: Duration = Duration::from_millis(10);

pub struct MainDispatcher {
    queue: DeliveryQueue,
    handler_active: Mutex<bool>,
    main_loop: Arc<dyn MainLoop>,
    invoker: Invoker,
    yield_after: Duration,
    self_weak: Mutex<Weak<MainDispatcher>>,
}

impl MainDispatcher {
    pub fn new(main_loop: Arc<dyn MainLoop>, invoker: Invoker, yield_after: Duration) -> Arc<Self> {
        let arc = Arc::new_cyclic(|weak| MainDispatcher {
            queue: DeliveryQueue::new(),
            handler_active: Mutex::new(false),
            main_loop,
            invoker,
            yield_after,
            self_weak: Mutex::new(weak.clone()),
        });
        arc
    }

    /// `ordered = false` is plain MAIN: inline if the caller is already on
    /// the main thread, observable as nested inside the current tick.
    /// `ordered = true` is MAIN_ORDERED: always enqueues, observable strictly
    /// after the current tick returns.
    pub fn enqueue(
        self: &Arc<Self>,
        consumer: ConsumerDescriptor,
        payload: Arc<dyn Any + Send + Sync>,
        ordered: bool,
    ) {
        if !ordered && self.main_loop.is_on_main_thread() {
            (self.invoker)(&consumer, &payload);
            return;
        }

        self.queue.enqueue(consumer, payload);
        let mut active = self.handler_active.lock();
        if *active {
            return;
        }
        *active = true;
        drop(active);

        let this = self.clone();
        if self
            .main_loop
            .post_task(Box::new(move || this.drain_task()))
            .is_err()
        {
            // Main loop refused the task outright (e.g. shutting down): run
            // the drain inline rather than lose the delivery.
            self.drain_task();
        }
    }

    fn drain_task(self: Arc<Self>) {
        let start = Instant::now();
        loop {
            let Some(node) = self.queue.poll() else {
                break;
            };
            (self.invoker)(&node.consumer, &node.payload);
            self.queue.recycle(node);

            if start.elapsed() > self.yield_after {
                let this = self.clone();
                if self
                    .main_loop
                    .post_task(Box::new(move || this.drain_task()))
                    .is_ok()
                {
                    return;
                }
                // Repost failed; keep draining inline on this tick.
            }
        }

        *self.handler_active.lock() = false;
        // Close the race: something may have been enqueued between the last
        // `poll()` miss and clearing the flag above.
        if !self.queue.is_empty() {
            let mut active = self.handler_active.lock();
            if !*active {
                *active = true;
                drop(active);
                let weak = self.self_weak.lock().clone();
                if let Some(this) = weak.upgrade() {
                    let _ = self.main_loop.post_task(Box::new(move || this.drain_task()));
                }
            }
        }
    }
}
