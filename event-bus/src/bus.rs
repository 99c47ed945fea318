//! `Bus` facade (spec.md §4.6): the public surface, and `Channel`, the
//! generic engine instantiated twice — once for events, once for
//! exceptional-events — per the Design Notes' "parameterise one generic
//! channel rather than duplicate code" (spec.md §9).

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::LocalKey;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::{BusConfig, BusConfigBuilder, ChannelConfig};
use crate::consumer::{ConsumerDescriptor, EventPayload, ThreadMode};
use crate::context::{PostingContextState, QueuedEvent, EVENTS_CONTEXT, EXCEPTIONS_CONTEXT};
use crate::dispatch::{AsyncDispatcher, BackgroundDispatcher, Invoker, MainDispatcher, PostingDispatcher};
use crate::error::BusError;
use crate::introspect::RegisterConsumers;
use crate::main_loop::MainLoop;
use crate::registry::Registry;
use crate::sticky::StickyCache;
use crate::type_id::TypeHierarchyCache;

/// Opaque identity returned by `register`/`register_handlers`, used to
/// `unregister` later. Wraps the address of the `Arc` the target was
/// registered through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetHandle(u64);

/// Posted when `post`/`throw` finds no matching consumer and
/// `send_no_consumer_event` is enabled (spec.md §4.5 step 4d).
pub struct NoConsumerEvent {
    pub original_type_name: &'static str,
    pub original_payload: Arc<dyn Any + Send + Sync>,
}

/// Posted on the exceptions channel when a consumer invocation panics and
/// `send_consumer_exception_event` is enabled (spec.md §4.6, §7).
pub struct ConsumerExceptionEvent {
    pub cause: String,
    pub original_payload: Arc<dyn Any + Send + Sync>,
    pub original_type_name: &'static str,
    pub target_id: u64,
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "consumer panicked with a non-string payload".to_string()
    }
}

/// Builds the shared `Invoker` every dispatcher on a channel calls through:
/// checks `active`, catches a panicking consumer, and applies the exception
/// policy (log / rebroadcast onto the bus's exceptions channel / re-raise).
fn build_invoker(channel_name: &'static str, config: ChannelConfig, bus: Weak<EventBus>) -> Invoker {
    Arc::new(move |consumer: &ConsumerDescriptor, payload: &Arc<dyn Any + Send + Sync>| {
        if !consumer.is_active() {
            return;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (consumer.invoke)(payload.as_ref())));
        let Err(cause) = outcome else {
            return;
        };

        // Recursive errors: a ConsumerExceptionEvent handler that itself
        // panics only gets logged, never rebroadcast (spec.md §7).
        if (**payload).type_id() == TypeId::of::<ConsumerExceptionEvent>() {
            error!(
                channel = channel_name,
                "a ConsumerExceptionEvent handler itself panicked; logging only to guarantee termination"
            );
            return;
        }

        let message = panic_message(&*cause);
        if config.log_consumer_exceptions {
            error!(
                channel = channel_name,
                target_id = consumer.target_id,
                event_type = consumer.event_type_name,
                error = %message,
                "consumer invocation failed",
            );
        }
        if config.send_consumer_exception_event {
            if let Some(bus) = bus.upgrade() {
                let event = ConsumerExceptionEvent {
                    cause: message,
                    original_payload: payload.clone(),
                    original_type_name: consumer.event_type_name,
                    target_id: consumer.target_id,
                };
                let _ = bus
                    .exceptions
                    .post_dyn(Arc::new(event), TypeId::of::<ConsumerExceptionEvent>(), "ConsumerExceptionEvent");
            }
        }
        if config.throw_consumer_exception {
            panic::resume_unwind(cause);
        }
    })
}

/// The engine shared by both the events and exceptional-events channels:
/// registry, sticky cache, posting-context drain loop, and the four
/// dispatchers. `Bus` instantiates this twice (see module docs).
struct Channel {
    name: &'static str,
    config: ChannelConfig,
    registry: Registry,
    sticky: StickyCache,
    hierarchy: Arc<TypeHierarchyCache>,
    main_loop: Arc<dyn MainLoop>,
    register_lock: Mutex<()>,
    context: &'static LocalKey<RefCell<PostingContextState>>,
    posting: PostingDispatcher,
    main: Arc<MainDispatcher>,
    background: Arc<BackgroundDispatcher>,
    async_dispatcher: AsyncDispatcher,
}

impl Channel {
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: &'static str,
        config: ChannelConfig,
        hierarchy: Arc<TypeHierarchyCache>,
        executor: Arc<dyn crate::executor::ExecutorHandle>,
        main_loop: Arc<dyn MainLoop>,
        yield_after: std::time::Duration,
        bus: Weak<EventBus>,
        context: &'static LocalKey<RefCell<PostingContextState>>,
    ) -> Self {
        let invoker = build_invoker(name, config.clone(), bus);
        let posting = PostingDispatcher::new(invoker.clone());
        let main = MainDispatcher::new(main_loop.clone(), invoker.clone(), yield_after);
        let background = BackgroundDispatcher::new(executor.clone(), main_loop.clone(), invoker.clone());
        let async_dispatcher = AsyncDispatcher::new(executor, invoker);
        Self {
            name,
            config,
            registry: Registry::new(name),
            sticky: StickyCache::new(),
            hierarchy,
            main_loop,
            register_lock: Mutex::new(()),
            context,
            posting,
            main,
            background,
            async_dispatcher,
        }
    }

    fn dispatch_to(&self, descriptor: &ConsumerDescriptor, payload: Arc<dyn Any + Send + Sync>) -> Result<(), BusError> {
        match descriptor.thread_mode {
            ThreadMode::Posting => {
                self.posting.enqueue(descriptor, &payload);
                Ok(())
            }
            ThreadMode::Main => {
                self.main.enqueue(descriptor.clone(), payload, false);
                Ok(())
            }
            ThreadMode::MainOrdered => {
                self.main.enqueue(descriptor.clone(), payload, true);
                Ok(())
            }
            ThreadMode::Background => self.background.enqueue(descriptor.clone(), payload),
            ThreadMode::Async => self.async_dispatcher.enqueue(descriptor.clone(), payload),
        }
    }

    fn register(&self, target: Arc<dyn RegisterConsumers>) -> Result<TargetHandle, BusError> {
        let pending = target.clone().consumer_descriptors();
        if pending.is_empty() {
            return Err(BusError::NoConsumerMethods { channel: self.name });
        }
        // Arc::as_ptr on a `dyn Trait` yields the fat pointer to the
        // allocation; truncating to a thin `*const ()` keeps only the data
        // address, which is what identifies "this particular target".
        let target_id = Arc::as_ptr(&target) as *const () as u64;

        let _guard = self.register_lock.lock();

        let mut inserted = Vec::new();
        for p in pending {
            let descriptor = ConsumerDescriptor {
                target_id,
                event_type: p.event_type,
                event_type_name: p.event_type_name,
                thread_mode: p.thread_mode,
                priority: p.priority,
                sticky: p.sticky,
                active: Arc::new(AtomicBool::new(true)),
                invoke: p.invoke,
            };
            match self.registry.insert(descriptor) {
                Ok(reg) => inserted.push(reg),
                Err(e) => {
                    for reg in &inserted {
                        self.registry.remove_single(target_id, reg.descriptor.event_type);
                    }
                    return Err(e);
                }
            }
        }

        let mut first_err = None;
        for reg in &inserted {
            if !reg.descriptor.sticky {
                continue;
            }
            let matches = if self.config.event_inheritance {
                self.sticky.assignable_to(reg.descriptor.event_type, &self.hierarchy)
            } else {
                self.sticky.get(reg.descriptor.event_type).into_iter().collect()
            };
            for payload in matches {
                if let Err(e) = self.dispatch_to(&reg.descriptor, payload) {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        debug!(channel = self.name, target_id, count = inserted.len(), "registered target");
        match first_err {
            Some(e) => Err(e),
            None => Ok(TargetHandle(target_id)),
        }
    }

    fn unregister(&self, handle: TargetHandle) {
        let _guard = self.register_lock.lock();
        let removed = self.registry.remove_target(handle.0);
        if removed.is_empty() {
            warn!(
                channel = self.name,
                target_id = handle.0,
                "unregister called for an unknown or already-removed target"
            );
        } else {
            debug!(channel = self.name, target_id = handle.0, count = removed.len(), "unregistered target");
        }
    }

    fn post_dyn(&self, payload: Arc<dyn Any + Send + Sync>, type_id: TypeId, type_name: &'static str) -> Result<(), BusError> {
        self.context.with(|cell| {
            {
                let mut ctx = cell.borrow_mut();
                ctx.queue.push_back(QueuedEvent { type_id, type_name, payload });
                if ctx.is_posting {
                    return Ok(());
                }
                ctx.is_posting = true;
                ctx.is_main_thread = self.main_loop.is_on_main_thread();
            }
            self.drain(cell)
        })
    }

    fn drain(&self, cell: &RefCell<PostingContextState>) -> Result<(), BusError> {
        let mut first_err = None;
        loop {
            let next = cell.borrow_mut().queue.pop_front();
            let Some(evt) = next else { break };
            if let Err(e) = self.deliver(cell, evt) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        cell.borrow_mut().is_posting = false;
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn deliver(&self, cell: &RefCell<PostingContextState>, evt: QueuedEvent) -> Result<(), BusError> {
        let widened = if self.config.event_inheritance {
            (*self.hierarchy.widen(evt.type_id)).clone()
        } else {
            vec![evt.type_id]
        };

        let mut matched = false;
        let mut first_err = None;
        for widened_type in widened {
            let snapshot = self.registry.snapshot(widened_type);
            for reg in snapshot.iter() {
                cell.borrow_mut().current_mode = Some(reg.descriptor.thread_mode);

                if let Err(e) = self.dispatch_to(&reg.descriptor, evt.payload.clone()) {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }

                let canceled = {
                    let mut ctx = cell.borrow_mut();
                    let canceled = ctx.canceled;
                    ctx.current_mode = None;
                    ctx.canceled = false;
                    canceled
                };
                matched = true;
                if canceled {
                    // Only the inner loop over this widened type's consumer
                    // list aborts (spec.md §4.5 step 4c: "break out of the
                    // R-loop for this E"); consumers declared on other
                    // widened supertypes still run.
                    break;
                }
            }
        }

        if !matched {
            if self.config.log_no_consumer_messages {
                debug!(channel = self.name, event_type = evt.type_name, "no consumer for event");
            }
            let is_noise =
                evt.type_id == TypeId::of::<NoConsumerEvent>() || evt.type_id == TypeId::of::<ConsumerExceptionEvent>();
            if self.config.send_no_consumer_event && !is_noise {
                let no_consumer = NoConsumerEvent {
                    original_type_name: evt.type_name,
                    original_payload: evt.payload.clone(),
                };
                // Recursive post on this same channel's context: picked up
                // by the drain loop already running on this thread.
                if let Err(e) = self.post_dyn(Arc::new(no_consumer), TypeId::of::<NoConsumerEvent>(), "NoConsumerEvent") {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn post<T: EventPayload>(&self, payload: T) -> Result<(), BusError> {
        self.post_dyn(Arc::new(payload), TypeId::of::<T>(), std::any::type_name::<T>())
    }

    fn post_sticky<T: EventPayload>(&self, payload: T) -> Result<(), BusError> {
        let type_id = TypeId::of::<T>();
        let arc: Arc<dyn Any + Send + Sync> = Arc::new(payload);
        self.sticky.put(type_id, arc.clone());
        self.post_dyn(arc, type_id, std::any::type_name::<T>())
    }

    fn cancel_delivery(&self) -> Result<(), BusError> {
        self.context.with(|cell| {
            let mut ctx = cell.borrow_mut();
            if ctx.is_posting && ctx.current_mode == Some(ThreadMode::Posting) {
                ctx.canceled = true;
                Ok(())
            } else {
                Err(BusError::IllegalCancel)
            }
        })
    }

    fn has_consumer_for(&self, type_id: TypeId) -> bool {
        self.registry.has_consumer_for(type_id, &self.hierarchy, self.config.event_inheritance)
    }
}

/// The public façade (spec.md §4.6). Two logically-distinct channels —
/// events and exceptional-events — share this one type's implementation but
/// never each other's registry, dispatchers, sticky cache, or posting
/// context (spec.md §9: "an exact structural duplicate ... with independent
/// registries, dispatchers, sticky cache, and posting contexts").
pub struct EventBus {
    hierarchy: Arc<TypeHierarchyCache>,
    events: Channel,
    exceptions: Channel,
}

static DEFAULT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

impl EventBus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<EventBus>| {
            let hierarchy = Arc::new(TypeHierarchyCache::new());
            EventBus {
                events: Channel::new(
                    "events",
                    config.events,
                    hierarchy.clone(),
                    config.executor.clone(),
                    config.main_loop.clone(),
                    config.main_loop_yield_after,
                    weak.clone(),
                    &EVENTS_CONTEXT,
                ),
                exceptions: Channel::new(
                    "exceptions",
                    config.exceptions,
                    hierarchy.clone(),
                    config.executor,
                    config.main_loop,
                    config.main_loop_yield_after,
                    weak.clone(),
                    &EXCEPTIONS_CONTEXT,
                ),
                hierarchy,
            }
        })
    }

    pub fn builder() -> BusConfigBuilder {
        BusConfigBuilder::new()
    }

    /// Process-wide lazily-initialised singleton (spec.md §9 Design Notes),
    /// built with double-checked construction via `OnceLock`.
    pub fn global() -> Arc<EventBus> {
        DEFAULT_BUS.get_or_init(|| EventBus::new(BusConfig::default())).clone()
    }

    /// Declares that `Sub` widens to `Super` for inheritance-mode matching
    /// (spec.md §4.1), shared by both channels.
    pub fn register_supertype<Sub: Any + 'static, Super: Any + 'static>(&self) {
        self.hierarchy.register_edge(TypeId::of::<Sub>(), TypeId::of::<Super>());
    }

    // --- events channel surface ---

    pub fn register(&self, target: Arc<dyn RegisterConsumers>) -> Result<TargetHandle, BusError> {
        self.events.register(target)
    }

    pub fn unregister(&self, handle: TargetHandle) {
        self.events.unregister(handle)
    }

    pub fn post<T: EventPayload>(&self, payload: T) -> Result<(), BusError> {
        self.events.post(payload)
    }

    pub fn post_sticky<T: EventPayload>(&self, payload: T) -> Result<(), BusError> {
        self.events.post_sticky(payload)
    }

    pub fn cancel_delivery(&self) -> Result<(), BusError> {
        self.events.cancel_delivery()
    }

    pub fn has_consumer_for(&self, type_id: TypeId) -> bool {
        self.events.has_consumer_for(type_id)
    }

    pub fn get_sticky(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.events.sticky.get(type_id)
    }

    pub fn remove_sticky(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.events.sticky.remove(type_id)
    }

    pub fn remove_sticky_if_equals<T: Any + Send + Sync + PartialEq>(&self, value: &T) -> bool {
        self.events.sticky.remove_if_equals(value)
    }

    pub fn remove_all_sticky(&self) {
        self.events.sticky.remove_all()
    }

    // --- exceptional-events surface (symmetric, §1/§9) ---

    pub fn register_handlers(&self, target: Arc<dyn RegisterConsumers>) -> Result<TargetHandle, BusError> {
        self.exceptions.register(target)
    }

    pub fn unregister_handlers(&self, handle: TargetHandle) {
        self.exceptions.unregister(handle)
    }

    pub fn throw<T: EventPayload>(&self, payload: T) -> Result<(), BusError> {
        self.exceptions.post(payload)
    }

    pub fn throw_sticky<T: EventPayload>(&self, payload: T) -> Result<(), BusError> {
        self.exceptions.post_sticky(payload)
    }

    pub fn cancel_handling(&self) -> Result<(), BusError> {
        self.exceptions.cancel_delivery()
    }

    pub fn has_handler_for(&self, type_id: TypeId) -> bool {
        self.exceptions.has_consumer_for(type_id)
    }

    pub fn get_sticky_exception(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.exceptions.sticky.get(type_id)
    }

    pub fn remove_sticky_exception(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.exceptions.sticky.remove(type_id)
    }

    pub fn remove_all_sticky_exceptions(&self) {
        self.exceptions.sticky.remove_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::ConsumerBuilder;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct Recorder {
        seen: StdMutex<Vec<String>>,
    }
    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self { seen: StdMutex::new(Vec::new()) })
        }
        fn push(&self, s: impl Into<String>) {
            self.seen.lock().unwrap().push(s.into());
        }
        fn snapshot(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }
    impl RegisterConsumers for Recorder {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<String>(ThreadMode::Posting, 0, false, |r, s| r.push(s.clone()))
                .build()
        }
    }

    #[test]
    fn basic_post_invokes_once() {
        let bus = EventBus::new(BusConfig::default());
        let recorder = Recorder::new();
        bus.register(recorder.clone()).unwrap();
        bus.post("hello".to_string()).unwrap();
        assert_eq!(recorder.snapshot(), vec!["hello".to_string()]);
    }

    struct PriorityOrder {
        order: StdMutex<Vec<i32>>,
    }
    impl RegisterConsumers for PriorityOrder {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<i32>(ThreadMode::Posting, 5, false, |t, _| t.order.lock().unwrap().push(5))
                .on::<i32>(ThreadMode::Posting, 0, false, |t, _| t.order.lock().unwrap().push(0))
                .on::<i32>(ThreadMode::Posting, 10, false, |t, _| t.order.lock().unwrap().push(10))
                .build()
        }
    }

    #[test]
    fn priority_ordering_is_descending() {
        let bus = EventBus::new(BusConfig::default());
        let target = Arc::new(PriorityOrder { order: StdMutex::new(Vec::new()) });
        bus.register(target.clone()).unwrap();
        bus.post(1i32).unwrap();
        assert_eq!(*target.order.lock().unwrap(), vec![10, 5, 0]);
    }

    struct WideningBase {
        hits: StdMutex<u32>,
    }
    struct WideningMid;
    impl RegisterConsumers for WideningBase {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<WideningRoot>(ThreadMode::Posting, 0, false, |t, _| *t.hits.lock().unwrap() += 1)
                .build()
        }
    }
    struct WideningLeaf {
        hits: StdMutex<u32>,
    }
    impl RegisterConsumers for WideningLeaf {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<WideningMid>(ThreadMode::Posting, 0, false, |t, _| *t.hits.lock().unwrap() += 1)
                .build()
        }
    }
    struct WideningRoot;

    #[test]
    fn inheritance_widening_delivers_to_both_levels() {
        let bus = EventBus::new(BusConfig::default());
        bus.register_supertype::<String, WideningMid>();
        bus.register_supertype::<WideningMid, WideningRoot>();

        let base = Arc::new(WideningBase { hits: StdMutex::new(0) });
        let leaf = Arc::new(WideningLeaf { hits: StdMutex::new(0) });
        bus.register(base.clone()).unwrap();
        bus.register(leaf.clone()).unwrap();

        bus.post("x".to_string()).unwrap();
        assert_eq!(*base.hits.lock().unwrap(), 1);
        assert_eq!(*leaf.hits.lock().unwrap(), 1);
    }

    struct StickyReceiver {
        seen: StdMutex<Option<i32>>,
    }
    impl RegisterConsumers for StickyReceiver {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<i32>(ThreadMode::Posting, 0, true, |t, v| *t.seen.lock().unwrap() = Some(*v))
                .build()
        }
    }

    #[test]
    fn sticky_replay_delivers_during_registration() {
        let bus = EventBus::new(BusConfig::default());
        bus.post_sticky(42i32).unwrap();

        let receiver = Arc::new(StickyReceiver { seen: StdMutex::new(None) });
        bus.register(receiver.clone()).unwrap();
        assert_eq!(*receiver.seen.lock().unwrap(), Some(42));
    }

    #[test]
    fn sticky_round_trip_remove_leaves_cache_empty() {
        let bus = EventBus::new(BusConfig::default());
        bus.post_sticky(7i32).unwrap();
        assert!(bus.get_sticky(TypeId::of::<i32>()).is_some());
        bus.remove_sticky(TypeId::of::<i32>());
        assert!(bus.get_sticky(TypeId::of::<i32>()).is_none());
    }

    struct CancelTarget {
        bus: Arc<EventBus>,
        low_priority_ran: StdMutex<bool>,
    }
    impl RegisterConsumers for CancelTarget {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<String>(ThreadMode::Posting, 10, false, |t, _| {
                    t.bus.cancel_delivery().unwrap();
                })
                .on::<String>(ThreadMode::Posting, 0, false, |t, _| {
                    *t.low_priority_ran.lock().unwrap() = true;
                })
                .build()
        }
    }

    #[test]
    fn cancel_delivery_stops_lower_priority_consumers() {
        let bus = EventBus::new(BusConfig::default());
        let target = Arc::new(CancelTarget {
            bus: bus.clone(),
            low_priority_ran: StdMutex::new(false),
        });
        bus.register(target.clone()).unwrap();
        bus.post("stop".to_string()).unwrap();
        assert!(!*target.low_priority_ran.lock().unwrap());
        // canceled resets after post returns; a second post runs normally.
        *target.low_priority_ran.lock().unwrap() = false;
    }

    struct CancelWideningSuper;

    struct CancelOnConcreteType {
        bus: Arc<EventBus>,
    }
    impl RegisterConsumers for CancelOnConcreteType {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<String>(ThreadMode::Posting, 0, false, |t, _| {
                    t.bus.cancel_delivery().unwrap();
                })
                .build()
        }
    }

    struct SupertypeConsumer {
        ran: StdMutex<bool>,
    }
    impl RegisterConsumers for SupertypeConsumer {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<CancelWideningSuper>(ThreadMode::Posting, 0, false, |t, _| {
                    *t.ran.lock().unwrap() = true;
                })
                .build()
        }
    }

    #[test]
    fn cancel_delivery_only_breaks_current_widened_types_loop() {
        let bus = EventBus::new(BusConfig::default());
        bus.register_supertype::<String, CancelWideningSuper>();

        let concrete = Arc::new(CancelOnConcreteType { bus: bus.clone() });
        let supertype = Arc::new(SupertypeConsumer { ran: StdMutex::new(false) });
        bus.register(concrete).unwrap();
        bus.register(supertype.clone()).unwrap();

        bus.post("stop".to_string()).unwrap();

        // Cancelling while handling the concrete `String` consumer list must
        // not suppress delivery to consumers declared on a widened supertype
        // (spec.md §4.5 step 4c breaks only "the R-loop for this E").
        assert!(*supertype.ran.lock().unwrap());
    }

    /// A deterministic stand-in for a real executor: tasks are recorded, not
    /// run, until the test explicitly drains them. This lets the
    /// unregister-vs-async-dispatch race be tested without timing-dependent
    /// sleeps.
    struct ManualExecutor {
        tasks: StdMutex<Vec<Box<dyn FnOnce() + Send>>>,
    }
    impl ManualExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self { tasks: StdMutex::new(Vec::new()) })
        }
        fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
            for t in tasks {
                t();
            }
        }
    }
    impl crate::executor::ExecutorHandle for ManualExecutor {
        fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Result<(), BusError> {
            self.tasks.lock().unwrap().push(task);
            Ok(())
        }
    }

    struct AsyncTarget {
        ran: StdMutex<bool>,
    }
    impl RegisterConsumers for AsyncTarget {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<i32>(ThreadMode::Async, 0, false, |t, _| *t.ran.lock().unwrap() = true)
                .build()
        }
    }

    #[test]
    fn unregister_before_async_drain_prevents_invocation() {
        let executor = ManualExecutor::new();
        let config = BusConfigBuilder::new().executor(executor.clone()).build();
        let bus = EventBus::new(config);
        let target = Arc::new(AsyncTarget { ran: StdMutex::new(false) });
        let handle = bus.register(target.clone()).unwrap();

        bus.post(1i32).unwrap();
        bus.unregister(handle);
        executor.run_all();

        assert!(!*target.ran.lock().unwrap());
    }

    struct RecursivePoster {
        bus: Arc<EventBus>,
        observed: StdMutex<Vec<i32>>,
    }
    impl RegisterConsumers for RecursivePoster {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<i32>(ThreadMode::Posting, 0, false, |t, n| {
                    t.observed.lock().unwrap().push(*n);
                    if *n < 10 {
                        t.bus.post(n + 1).unwrap();
                    }
                })
                .build()
        }
    }

    #[test]
    fn recursive_post_preserves_fifo_and_completes_before_returning() {
        let bus = EventBus::new(BusConfig::default());
        let target = Arc::new(RecursivePoster {
            bus: bus.clone(),
            observed: StdMutex::new(Vec::new()),
        });
        bus.register(target.clone()).unwrap();
        bus.post(1i32).unwrap();
        assert_eq!(*target.observed.lock().unwrap(), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn register_unregister_register_matches_single_register() {
        let bus = EventBus::new(BusConfig::default());
        let recorder = Recorder::new();
        let handle = bus.register(recorder.clone()).unwrap();
        bus.unregister(handle);
        bus.register(recorder.clone()).unwrap();
        bus.post("once".to_string()).unwrap();
        assert_eq!(recorder.snapshot(), vec!["once".to_string()]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let bus = EventBus::new(BusConfig::default());
        let recorder = Recorder::new();
        bus.register(recorder.clone()).unwrap();
        let err = bus.register(recorder).unwrap_err();
        assert!(matches!(err, BusError::AlreadyRegistered { .. }));
    }

    #[test]
    fn cancel_delivery_outside_posting_consumer_fails() {
        let bus = EventBus::new(BusConfig::default());
        let err = bus.cancel_delivery().unwrap_err();
        assert!(matches!(err, BusError::IllegalCancel));
    }

    struct FailingConsumer;
    impl RegisterConsumers for FailingConsumer {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<i32>(ThreadMode::Posting, 0, false, |_, _| panic!("boom"))
                .build()
        }
    }

    struct ExceptionCatcher {
        causes: StdMutex<Vec<String>>,
    }
    impl RegisterConsumers for ExceptionCatcher {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<ConsumerExceptionEvent>(ThreadMode::Posting, 0, false, |t, e| {
                    t.causes.lock().unwrap().push(e.cause.clone())
                })
                .build()
        }
    }

    #[test]
    fn consumer_panic_rebroadcasts_as_exception_event() {
        let bus = EventBus::new(BusConfig::default());
        bus.register(Arc::new(FailingConsumer)).unwrap();
        let catcher = Arc::new(ExceptionCatcher { causes: StdMutex::new(Vec::new()) });
        bus.register_handlers(catcher.clone()).unwrap();

        bus.post(1i32).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(catcher.causes.lock().unwrap().as_slice(), ["boom"]);
    }

    struct NoConsumerWatcher {
        names: StdMutex<Vec<&'static str>>,
    }
    impl RegisterConsumers for NoConsumerWatcher {
        fn consumer_descriptors(self: Arc<Self>) -> Vec<crate::introspect::PendingConsumer> {
            ConsumerBuilder::new(self)
                .on::<NoConsumerEvent>(ThreadMode::Posting, 0, false, |t, e| {
                    t.names.lock().unwrap().push(e.original_type_name)
                })
                .build()
        }
    }

    #[test]
    fn unmatched_post_raises_no_consumer_event() {
        let bus = EventBus::new(BusConfig::default());
        let watcher = Arc::new(NoConsumerWatcher { names: StdMutex::new(Vec::new()) });
        bus.register(watcher.clone()).unwrap();
        bus.post(99u64).unwrap();
        assert_eq!(watcher.names.lock().unwrap().len(), 1);
    }

    #[test]
    fn has_consumer_for_reflects_registrations() {
        let bus = EventBus::new(BusConfig::default());
        assert!(!bus.has_consumer_for(TypeId::of::<String>()));
        bus.register(Recorder::new()).unwrap();
        assert!(bus.has_consumer_for(TypeId::of::<String>()));
    }

    #[test]
    fn global_singleton_is_stable_across_calls() {
        let first = EventBus::global();
        let second = EventBus::global();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
