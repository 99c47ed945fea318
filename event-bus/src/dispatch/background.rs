//! `BackgroundDispatcher` (spec.md §4.3, mode BACKGROUND): serialised on one
//! shared worker drawn from the executor.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::consumer::ConsumerDescriptor;
use crate::error::BusError;
use crate::executor::ExecutorHandle;
use crate::main_loop::MainLoop;
use crate::queue::DeliveryQueue;

use super::Invoker;

/// How long the worker blocks per `poll` before rechecking whether it should
/// exit (spec.md §4.3: "drains the queue with a 1s poll timeout").
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct BackgroundDispatcher {
    queue: DeliveryQueue,
    executor_running: Mutex<bool>,
    executor: Arc<dyn ExecutorHandle>,
    main_loop: Arc<dyn MainLoop>,
    invoker: Invoker,
}

impl BackgroundDispatcher {
    pub fn new(executor: Arc<dyn ExecutorHandle>, main_loop: Arc<dyn MainLoop>, invoker: Invoker) -> Arc<Self> {
        Arc::new(Self {
            queue: DeliveryQueue::new(),
            executor_running: Mutex::new(false),
            executor,
            main_loop,
            invoker,
        })
    }

    pub fn enqueue(
        self: &Arc<Self>,
        consumer: ConsumerDescriptor,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> Result<(), BusError> {
        if !self.main_loop.is_on_main_thread() {
            // Already off-main: no hop needed.
            (self.invoker)(&consumer, &payload);
            return Ok(());
        }

        self.queue.enqueue(consumer, payload);
        let mut running = self.executor_running.lock();
        if *running {
            return Ok(());
        }
        *running = true;
        drop(running);

        let this = self.clone();
        if let Err(e) = self.executor.submit(Box::new(move || this.worker_loop())) {
            *self.executor_running.lock() = false;
            warn!(error = %e, "background dispatcher failed to submit worker task");
            return Err(e);
        }
        Ok(())
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            match self.queue.poll_timeout(POLL_TIMEOUT) {
                Some(node) => {
                    (self.invoker)(&node.consumer, &node.payload);
                    self.queue.recycle(node);
                }
                None => {
                    let mut running = self.executor_running.lock();
                    if self.queue.is_empty() {
                        *running = false;
                        return;
                    }
                    // Something snuck in between the timed-out poll and
                    // taking the lock; keep draining.
                }
            }
        }
    }
}
