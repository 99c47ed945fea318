//! Error taxonomy for the bus, mirroring the AudioVerse workspace convention
//! of a single `thiserror`-derived enum per crate (see `asset-manager`'s
//! `AssetError`). Nothing in this crate panics on a caller mistake; every
//! fallible entry point returns `Result<_, BusError>`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("target exposes no consumer methods on the `{channel}` channel")]
    NoConsumerMethods { channel: &'static str },

    #[error("target is already registered for `{type_name}` on the `{channel}` channel")]
    AlreadyRegistered {
        channel: &'static str,
        type_name: &'static str,
    },

    #[error("consumer method signature invalid: {0}")]
    IllegalMethodSignature(String),

    #[error("cancel_delivery called outside an in-flight POSTING/THROWING consumer")]
    IllegalCancel,

    #[error("consumer invocation failed: {0}")]
    InvocationFailed(String),

    #[error("dispatcher failed to submit task: {0}")]
    DispatcherSubmitFailed(String),
}
