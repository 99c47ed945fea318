//! The dispatcher family (spec.md §4.3): four `enqueue(consumer, payload)`
//! strategies sharing a common `Invoker` callback that applies the active
//! check and the consumer-exception policy. `Channel` (in `bus.rs`) owns one
//! instance of each and picks the right one per `ThreadMode`.

pub mod async_pool;
pub mod background;
pub mod main_loop;
pub mod posting;

use std::any::Any;
use std::sync::Arc;

use crate::consumer::ConsumerDescriptor;

/// Invokes a consumer, honouring `active` and the configured exception
/// policy. Shared by every dispatcher so none of them need to know about
/// panics, logging, or `ConsumerExceptionEvent` rebroadcast.
pub type Invoker = Arc<dyn Fn(&ConsumerDescriptor, &Arc<dyn Any + Send + Sync>) + Send + Sync>;

pub use async_pool::AsyncDispatcher;
pub use background::BackgroundDispatcher;
pub use main_loop::MainDispatcher;
pub use posting::PostingDispatcher;
