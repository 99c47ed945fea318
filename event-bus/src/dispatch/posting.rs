//! `PostingDispatcher` (spec.md §4.3, mode POSTING): synchronous, no queue —
//! invokes inline on the caller thread before `enqueue` returns.

use std::any::Any;
use std::sync::Arc;

use crate::consumer::ConsumerDescriptor;

use super::Invoker;

pub struct PostingDispatcher {
    invoker: Invoker,
}

impl PostingDispatcher {
    pub fn new(invoker: Invoker) -> Self {
        Self { invoker }
    }

    pub fn enqueue(&self, consumer: &ConsumerDescriptor, payload: &Arc<dyn Any + Send + Sync>) {
        (self.invoker)(consumer, payload);
    }
}
