//! `ExecutorHandle` (spec.md §4.3, §9): the collaborator `BackgroundDispatcher`
//! and `AsyncDispatcher` submit work to. Nothing in this workspace's
//! dependency stack supplies a ready-made cached thread pool, so the default
//! implementation spawns a detached `std::thread` per submission — an
//! "unbounded cached pool" in spirit (`executor: ExecutorHandle =
//! defaultCachedPool` in spec.md §6) without pulling in a new executor crate
//! for this alone.

use crate::error::BusError;

pub trait ExecutorHandle: Send + Sync {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Result<(), BusError>;
}

pub struct ThreadSpawnExecutor;

impl ExecutorHandle for ThreadSpawnExecutor {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Result<(), BusError> {
        std::thread::Builder::new()
            .name("event-bus-worker".into())
            .spawn(task)
            .map(|_| ())
            .map_err(|e| BusError::DispatcherSubmitFailed(e.to_string()))
    }
}
