//! `BusConfigBuilder` / `BusConfig` (spec.md §6), shaped the way the
//! teacher's constructors take a builder with `with_*` setters (compare
//! `audio-system::AudioSystem::new` / `asset-manager`'s setup helpers).
//!
//! Per spec.md §9's redesign note, `throw_consumer_exception` (events
//! channel) and `throw_handler_exception` (exceptional-events channel) are
//! kept as two independent fields rather than one assigning into the
//! other's storage — the bug the spec explicitly calls out.

use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::main_loop::DEFAULT_YIELD_AFTER;
use crate::executor::{ExecutorHandle, ThreadSpawnExecutor};
use crate::main_loop::{MainLoop, NoMainLoop};

/// The recognized options for a single channel (spec.md §6), duplicated for
/// the events and exceptional-events channels.
#[derive(Clone)]
pub struct ChannelConfig {
    pub log_consumer_exceptions: bool,
    pub log_no_consumer_messages: bool,
    pub send_consumer_exception_event: bool,
    pub send_no_consumer_event: bool,
    pub throw_consumer_exception: bool,
    pub event_inheritance: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            log_consumer_exceptions: true,
            log_no_consumer_messages: true,
            send_consumer_exception_event: true,
            send_no_consumer_event: true,
            throw_consumer_exception: false,
            event_inheritance: true,
        }
    }
}

#[derive(Clone)]
pub struct BusConfig {
    pub events: ChannelConfig,
    pub exceptions: ChannelConfig,
    pub executor: Arc<dyn ExecutorHandle>,
    pub main_loop: Arc<dyn MainLoop>,
    pub main_loop_yield_after: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            events: ChannelConfig::default(),
            exceptions: ChannelConfig::default(),
            executor: Arc::new(ThreadSpawnExecutor),
            main_loop: Arc::new(NoMainLoop),
            main_loop_yield_after: DEFAULT_YIELD_AFTER,
        }
    }
}

pub struct BusConfigBuilder {
    config: BusConfig,
}

impl BusConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
        }
    }

    pub fn log_consumer_exceptions(mut self, value: bool) -> Self {
        self.config.events.log_consumer_exceptions = value;
        self
    }

    pub fn log_no_consumer_messages(mut self, value: bool) -> Self {
        self.config.events.log_no_consumer_messages = value;
        self
    }

    pub fn send_consumer_exception_event(mut self, value: bool) -> Self {
        self.config.events.send_consumer_exception_event = value;
        self
    }

    pub fn send_no_consumer_event(mut self, value: bool) -> Self {
        self.config.events.send_no_consumer_event = value;
        self
    }

    /// Independent of `throw_handler_exception` — see module docs.
    pub fn throw_consumer_exception(mut self, value: bool) -> Self {
        self.config.events.throw_consumer_exception = value;
        self
    }

    pub fn event_inheritance(mut self, value: bool) -> Self {
        self.config.events.event_inheritance = value;
        self.config.exceptions.event_inheritance = value;
        self
    }

    pub fn log_handler_exceptions(mut self, value: bool) -> Self {
        self.config.exceptions.log_consumer_exceptions = value;
        self
    }

    pub fn log_no_handler_messages(mut self, value: bool) -> Self {
        self.config.exceptions.log_no_consumer_messages = value;
        self
    }

    /// Independent of `throw_consumer_exception` — see module docs.
    pub fn throw_handler_exception(mut self, value: bool) -> Self {
        self.config.exceptions.throw_consumer_exception = value;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ExecutorHandle>) -> Self {
        self.config.executor = executor;
        self
    }

    pub fn main_loop(mut self, main_loop: Arc<dyn MainLoop>) -> Self {
        self.config.main_loop = main_loop;
        self
    }

    pub fn main_loop_yield_after(mut self, duration: Duration) -> Self {
        self.config.main_loop_yield_after = duration;
        self
    }

    pub fn build(self) -> BusConfig {
        self.config
    }
}

impl Default for BusConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
