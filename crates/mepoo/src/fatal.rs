//! Central sink for fatal errors.
//!
//! Pools hold an `Arc<dyn ErrorHandler>` instead of reaching for a global.
//! Production code keeps the default [`AbortHandler`]; tests inject a
//! handler that records what it saw and returns, in which case the
//! operation reports `Err(FatalError)` and leaves pool state untouched.

use crate::errors::FatalError;
use std::sync::Arc;

pub trait ErrorHandler: Send + Sync {
    /// Called exactly once per fatal condition, before the operation returns.
    fn on_fatal(&self, error: &FatalError);
}

/// Logs the error and terminates the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbortHandler;

impl ErrorHandler for AbortHandler {
    fn on_fatal(&self, error: &FatalError) {
        tracing::error!(%error, "Fatal mempool error, aborting");
        std::process::abort();
    }
}

/// Unwinds instead of aborting.
///
/// Useful for embedders that isolate a faulty participant with
/// `catch_unwind`. With `panic = "abort"` this behaves like [`AbortHandler`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicHandler;

impl ErrorHandler for PanicHandler {
    fn on_fatal(&self, error: &FatalError) {
        panic!("Fatal mempool error: {error}");
    }
}

pub fn default_handler() -> Arc<dyn ErrorHandler> {
    Arc::new(AbortHandler)
}

/// Log `error`, hand it to `handler` and give it back for `Err(..)`.
pub(crate) fn report(handler: &dyn ErrorHandler, error: FatalError) -> FatalError {
    tracing::error!(%error, "Fatal mempool error");
    handler.on_fatal(&error);
    error
}

/// Fail-fast path for code that has no handler at hand (chunk headers).
///
/// Aborts regardless of the panic strategy, so the error cannot be caught
/// by `catch_unwind` further up.
pub(crate) fn fail_fast(error: FatalError) -> ! {
    tracing::error!(%error, "Fatal chunk error, aborting");
    std::process::abort();
}
