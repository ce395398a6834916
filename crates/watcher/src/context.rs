//! Delivery execution context
//!
//! Every consumer delivery of a manager runs in one task on the runtime
//! captured here, so deliveries are serialized on one logical thread of
//! control. Facilities also arm their latency timers on it.

use fsstream_core::error::{Error, Result};
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// The runtime a manager delivers on
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    handle: Handle,
}

impl ExecutionContext {
    /// Capture the caller's runtime
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|e| {
                Error::invalid_configuration(format!("No execution context available: {e}"))
            })
    }

    /// Bind delivery to another runtime
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a task on this context
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl From<Handle> for ExecutionContext {
    fn from(handle: Handle) -> Self {
        Self::from_handle(handle)
    }
}
