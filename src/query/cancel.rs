use parking_lot::Mutex;
use rusqlite::InterruptHandle;
use std::sync::Arc;
use tracing::debug;

/// Lets a CancelRequest interrupt whatever backend statement a session is
/// running. A bypass worker publishes its connection's interrupt handle here
/// for the duration of the statement.
#[derive(Default)]
pub struct CancelHandle {
    running: Mutex<Option<Arc<InterruptHandle>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: Arc<InterruptHandle>) {
        *self.running.lock() = Some(handle);
    }

    /// Clear the slot if it still holds `handle`. A newer statement may have
    /// replaced it already.
    pub fn clear(&self, handle: &Arc<InterruptHandle>) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)) {
            *running = None;
        }
    }

    /// Interrupt the running statement. Returns false when nothing was
    /// running.
    pub fn cancel(&self) -> bool {
        match self.running.lock().as_ref() {
            Some(handle) => {
                handle.interrupt();
                debug!("backend statement interrupted");
                true
            }
            None => false,
        }
    }
}
