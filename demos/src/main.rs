//! Drives an `EventBus` through each of its delivery modes end to end,
//! in the shape of the workspace's other front-end binaries: construct the
//! collaborators, then run a small tick loop that drains deferred work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use event_bus::{
    BusError, ConsumerBuilder, ConsumerExceptionEvent, EventBus, MainLoop, NoConsumerEvent,
    PendingConsumer, RegisterConsumers, ThreadMode,
};

/// A main loop for a thread-per-tick host: `post_task` just queues; the
/// owning thread calls `drain_pending` once per tick, standing in for a
/// host's real event loop (e.g. a windowing or ECS schedule tick).
struct TickMainLoop {
    main_thread: std::thread::ThreadId,
    pending: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl TickMainLoop {
    fn new() -> Self {
        Self {
            main_thread: std::thread::current().id(),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn drain_pending(&self) {
        loop {
            let task = self.pending.lock().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }
}

impl MainLoop for TickMainLoop {
    fn is_on_main_thread(&self) -> bool {
        std::thread::current().id() == self.main_thread
    }

    fn post_task(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Result<(), BusError> {
        self.pending.lock().push_back(task);
        Ok(())
    }
}

#[derive(Debug)]
struct Tick(u32);

#[derive(Debug)]
struct Shout;

struct Listener {
    name: &'static str,
}

impl RegisterConsumers for Listener {
    fn consumer_descriptors(self: Arc<Self>) -> Vec<PendingConsumer> {
        ConsumerBuilder::new(self)
            .on::<Tick>(ThreadMode::Posting, 10, false, |l, t| {
                tracing::info!(listener = l.name, tick = t.0, "POSTING: handled inline, same thread as post()");
            })
            .on::<Tick>(ThreadMode::MainOrdered, 0, false, |l, t| {
                tracing::info!(listener = l.name, tick = t.0, "MAIN_ORDERED: handled during the next drain_pending()");
            })
            .on::<Tick>(ThreadMode::Background, 0, false, |l, t| {
                tracing::info!(listener = l.name, tick = t.0, "BACKGROUND: handled on the shared worker thread");
            })
            .on::<Tick>(ThreadMode::Async, 0, false, |l, t| {
                tracing::info!(listener = l.name, tick = t.0, "ASYNC: handled on its own executor thread");
            })
            .on::<Shout>(ThreadMode::Posting, 0, false, |_, _| {
                panic!("a handler that misbehaves");
            })
            .build()
    }
}

struct LateSubscriber {
    saw_sticky: Arc<AtomicBool>,
}

impl RegisterConsumers for LateSubscriber {
    fn consumer_descriptors(self: Arc<Self>) -> Vec<PendingConsumer> {
        ConsumerBuilder::new(self)
            .on::<Tick>(ThreadMode::Posting, 0, true, |l, t| {
                l.saw_sticky.store(true, Ordering::SeqCst);
                tracing::info!(tick = t.0, "late subscriber replayed the sticky tick on registration");
            })
            .build()
    }
}

struct Watcher;

impl RegisterConsumers for Watcher {
    fn consumer_descriptors(self: Arc<Self>) -> Vec<PendingConsumer> {
        ConsumerBuilder::new(self)
            .on::<NoConsumerEvent>(ThreadMode::Posting, 0, false, |_, e| {
                tracing::warn!(event_type = e.original_type_name, "no consumer was registered for this event");
            })
            .build()
    }
}

struct ExceptionWatcher;

impl RegisterConsumers for ExceptionWatcher {
    fn consumer_descriptors(self: Arc<Self>) -> Vec<PendingConsumer> {
        ConsumerBuilder::new(self)
            .on::<ConsumerExceptionEvent>(ThreadMode::Posting, 0, false, |_, e| {
                tracing::error!(cause = %e.cause, event_type = e.original_type_name, "a consumer panicked");
            })
            .build()
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let main_loop = Arc::new(TickMainLoop::new());
    let config = EventBus::builder().main_loop(main_loop.clone()).build();
    let bus = EventBus::new(config);

    bus.register(Arc::new(Listener { name: "hud" })).unwrap();
    bus.register_handlers(Arc::new(ExceptionWatcher)).unwrap();
    bus.register(Arc::new(Watcher)).unwrap();

    // Sticky replay: post before anyone cares, then register a subscriber
    // that sees it immediately without a fresh post.
    bus.post_sticky(Tick(0)).unwrap();
    let late = Arc::new(LateSubscriber {
        saw_sticky: Arc::new(AtomicBool::new(false)),
    });
    bus.register(late.clone()).unwrap();
    assert!(late.saw_sticky.load(Ordering::SeqCst));

    // A handful of ticks: post(), then drain whatever MAIN_ORDERED work piled
    // up, mirroring a host's "emit, then run the frame" cadence.
    for n in 1..=3 {
        bus.post(Tick(n)).unwrap();
        main_loop.drain_pending();
        std::thread::sleep(Duration::from_millis(20));
    }

    // No consumer registered for this type: raises NoConsumerEvent.
    bus.post(42u64).unwrap();

    // A handler that panics: caught, logged, and rebroadcast as
    // ConsumerExceptionEvent on the exceptions channel.
    bus.post(Shout).unwrap();

    // Give the BACKGROUND/ASYNC workers a moment to print before exiting.
    std::thread::sleep(Duration::from_millis(100));
}
