//! `DeliveryQueue` (spec.md §4.2): a FIFO of `(consumer, payload)` nodes used
//! by the serialised dispatchers, backed by `crossbeam_queue::SegQueue` as in
//! the teacher's own `event-bus` (which queues `QueuedEvent` on a `SegQueue`).
//! `SegQueue` alone gives lock-free push/pop but no blocking wait, so a small
//! `parking_lot` doorbell (`Mutex<()>` + `Condvar`) is layered on top purely
//! to implement `poll(timeout)` — the classic pattern for turning a lock-free
//! queue into a blocking one without giving up its lock-free fast path.
//!
//! A bounded pool (capped at 10_000, per spec.md §4.2) recycles boxed
//! `PendingDelivery` nodes so hot serialised dispatchers avoid an allocation
//! per delivery.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::consumer::ConsumerDescriptor;

const POOL_CAPACITY: usize = 10_000;

pub struct PendingDelivery {
    pub consumer: ConsumerDescriptor,
    pub payload: Arc<dyn Any + Send + Sync>,
}

pub struct DeliveryQueue {
    items: SegQueue<Box<PendingDelivery>>,
    pool: SegQueue<Box<PendingDelivery>>,
    pool_len: AtomicUsize,
    len: AtomicUsize,
    doorbell: Mutex<()>,
    not_empty: Condvar,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            pool: SegQueue::new(),
            pool_len: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            doorbell: Mutex::new(()),
            not_empty: Condvar::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    pub fn enqueue(&self, consumer: ConsumerDescriptor, payload: Arc<dyn Any + Send + Sync>) {
        let node = match self.pool.pop() {
            Some(mut recycled) => {
                self.pool_len.fetch_sub(1, Ordering::AcqRel);
                *recycled = PendingDelivery { consumer, payload };
                recycled
            }
            None => Box::new(PendingDelivery { consumer, payload }),
        };
        self.items.push(node);
        self.len.fetch_add(1, Ordering::AcqRel);
        // Wake any poll(timeout) waiter. The doorbell lock is held only for
        // the duration of notify_all, never across the SegQueue operations.
        let _guard = self.doorbell.lock();
        self.not_empty.notify_all();
    }

    pub fn poll(&self) -> Option<Box<PendingDelivery>> {
        let node = self.items.pop()?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(node)
    }

    /// Blocks up to `timeout` waiting for an entry; returns `None` on
    /// timeout. Used by `BackgroundDispatcher`'s worker loop (spec.md §4.3:
    /// "drains the queue with a 1s poll timeout").
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Box<PendingDelivery>> {
        if let Some(node) = self.poll() {
            return Some(node);
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.doorbell.lock();
        loop {
            if let Some(node) = self.poll() {
                return Some(node);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let remaining = deadline - now;
            let result = self.not_empty.wait_for(&mut guard, remaining);
            if result.timed_out() {
                return self.poll();
            }
        }
    }

    /// Returns a drained node's storage to the pool for reuse, dropping the
    /// old consumer/payload references held inside it.
    pub fn recycle(&self, node: Box<PendingDelivery>) {
        if self.pool_len.load(Ordering::Acquire) < POOL_CAPACITY {
            self.pool.push(node);
            self.pool_len.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ThreadMode;
    use std::sync::atomic::AtomicBool;

    fn descriptor() -> ConsumerDescriptor {
        ConsumerDescriptor {
            target_id: 1,
            event_type: std::any::TypeId::of::<i32>(),
            event_type_name: "i32",
            thread_mode: ThreadMode::Background,
            priority: 0,
            sticky: false,
            active: Arc::new(AtomicBool::new(true)),
            invoke: Arc::new(|_| {}),
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let q = DeliveryQueue::new();
        q.enqueue(descriptor(), Arc::new(1i32));
        q.enqueue(descriptor(), Arc::new(2i32));
        let first = q.poll().unwrap();
        let second = q.poll().unwrap();
        assert_eq!(*first.payload.downcast_ref::<i32>().unwrap(), 1);
        assert_eq!(*second.payload.downcast_ref::<i32>().unwrap(), 2);
        assert!(q.poll().is_none());
    }

    #[test]
    fn poll_timeout_returns_none_when_empty() {
        let q = DeliveryQueue::new();
        assert!(q.poll_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn poll_timeout_wakes_on_enqueue() {
        let q = Arc::new(DeliveryQueue::new());
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.poll_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(30));
        q.enqueue(descriptor(), Arc::new(7i32));
        let result = handle.join().unwrap();
        assert_eq!(*result.unwrap().payload.downcast_ref::<i32>().unwrap(), 7);
    }

    #[test]
    fn recycled_nodes_are_reused() {
        let q = DeliveryQueue::new();
        q.enqueue(descriptor(), Arc::new(1i32));
        let node = q.poll().unwrap();
        q.recycle(node);
        assert_eq!(q.pool_len.load(Ordering::Acquire), 1);
        q.enqueue(descriptor(), Arc::new(2i32));
        assert_eq!(q.pool_len.load(Ordering::Acquire), 0);
    }
}
