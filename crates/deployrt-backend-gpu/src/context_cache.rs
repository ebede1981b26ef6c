use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::error::GpuBackendError;

/// Maps the calling thread's identity to its own `ort::session::Session`
/// clone (an independent execution context sharing the same underlying
/// engine). Lazily populated on first inference from a thread; the map
/// only ever grows, one entry per long-lived stage worker thread.
///
/// Mutation of the map is guarded by a single mutex. Unlike the original
/// C++ (which reads the map a second time after releasing the lock,
/// relying on the fact contexts are never removed), the lookup that
/// returns the context happens while still holding the lock, closing
/// that benign but unnecessary race window.
pub struct ThreadContextCache {
    contexts: Mutex<HashMap<ThreadId, Arc<ort::session::Session>>>,
}

impl ThreadContextCache {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the current thread's execution context, creating one via
    /// `create` if this is the first call from this thread.
    pub fn get_or_create(
        &self,
        create: impl FnOnce() -> Result<ort::session::Session, ort::Error>,
    ) -> Result<Arc<ort::session::Session>, GpuBackendError> {
        let tid = std::thread::current().id();
        let mut contexts = self.contexts.lock().unwrap();
        if let Some(context) = contexts.get(&tid) {
            return Ok(Arc::clone(context));
        }
        let context = Arc::new(create().map_err(|source| GpuBackendError::CreateContext { source })?);
        contexts.insert(tid, Arc::clone(&context));
        Ok(context)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }
}

impl Default for ThreadContextCache {
    fn default() -> Self {
        Self::new()
    }
}
