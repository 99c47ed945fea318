//! `AsyncDispatcher` (spec.md §4.3, mode ASYNC): always enqueues, submitting
//! one task per delivery to the executor — true parallel fan-out, multiple
//! ASYNC consumers for the same event may run concurrently on distinct
//! executor threads.

use std::any::Any;
use std::sync::Arc;

use crate::consumer::ConsumerDescriptor;
use crate::error::BusError;
use crate::executor::ExecutorHandle;

use super::Invoker;

pub struct AsyncDispatcher {
    executor: Arc<dyn ExecutorHandle>,
    invoker: Invoker,
}

impl AsyncDispatcher {
    pub fn new(executor: Arc<dyn ExecutorHandle>, invoker: Invoker) -> Self {
        Self { executor, invoker }
    }

    pub fn enqueue(
        &self,
        consumer: ConsumerDescriptor,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> Result<(), BusError> {
        let invoker = self.invoker.clone();
        self.executor.submit(Box::new(move || {
            (invoker)(&consumer, &payload);
        }))
    }
}
