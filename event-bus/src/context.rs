//! `PostingContext` (spec.md §4.5): per-thread, per-channel state tracking
//! the in-flight emit. Modelled as the Design Notes suggest — "an explicit
//! per-thread record keyed by thread identity" — via `thread_local!`. Two
//! independent statics exist, one per channel, since "two posting contexts
//! exist per thread: one for the events channel, one for the exceptional-
//! events channel" and both "are independently thread-local".

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::consumer::ThreadMode;

pub(crate) struct QueuedEvent {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub payload: Arc<dyn std::any::Any + Send + Sync>,
}

#[derive(Default)]
pub(crate) struct PostingContextState {
    pub queue: VecDeque<QueuedEvent>,
    pub is_posting: bool,
    pub is_main_thread: bool,
    /// Thread mode of the consumer currently being invoked, if any. Cancel
    /// is only legal while this is `Some(ThreadMode::Posting)`.
    pub current_mode: Option<ThreadMode>,
    pub canceled: bool,
}

thread_local! {
    pub(crate) static EVENTS_CONTEXT: RefCell<PostingContextState> = RefCell::new(PostingContextState::default());
    pub(crate) static EXCEPTIONS_CONTEXT: RefCell<PostingContextState> = RefCell::new(PostingContextState::default());
}
