//! The host "main thread" collaborator (spec.md §1: "treated as an opaque
//! `MainLoop` interface") and `NoMainLoop`, the degraded-mode default for
//! hosts without one (spec.md §4.3).

use crate::error::BusError;

pub trait MainLoop: Send + Sync {
    fn is_on_main_thread(&self) -> bool;
    fn post_task(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Result<(), BusError>;
}

/// Reports every thread as "the main thread" and runs posted tasks
/// synchronously in place. With this installed, `MAIN` and `MAIN_ORDERED`
/// both degrade to inline invocation — there is no loop to hop to, matching
/// the "documented degraded mode" the spec calls for.
pub struct NoMainLoop;

impl MainLoop for NoMainLoop {
    fn is_on_main_thread(&self) -> bool {
        true
    }

    fn post_task(&self, task: Box<dyn FnOnce() + Send + 'static>) -> Result<(), BusError> {
        task();
        Ok(())
    }
}
