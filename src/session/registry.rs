use crate::query::CancelHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Live sessions of the gateway, keyed by the secret each one hands out in
/// BackendKeyData, plus the admission count used to enforce
/// `max_connections`.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<i32, Arc<CancelHandle>>>,
    admitted: AtomicUsize,
    max_connections: usize,
}

/// A slot taken by an admitted connection, given back on drop.
pub struct Admission {
    registry: Arc<SessionRegistry>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.registry.admitted.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SessionRegistry {
    pub fn new(max_connections: usize) -> Self {
        SessionRegistry {
            sessions: RwLock::new(HashMap::new()),
            admitted: AtomicUsize::new(0),
            max_connections,
        }
    }

    /// Take a connection slot, or `None` when `max_connections` sessions are
    /// already running.
    pub fn try_admit(self: &Arc<Self>) -> Option<Admission> {
        let admitted = self
            .admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .is_ok();
        admitted.then(|| Admission {
            registry: self.clone(),
        })
    }

    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Register an authenticated session and return its secret, unique among
    /// the live sessions.
    pub fn register(&self, cancel: Arc<CancelHandle>) -> i32 {
        let mut sessions = self.sessions.write();
        let secret = loop {
            let candidate = rand::random::<i32>();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(secret, cancel);
        debug!("session {} registered, {} live", secret, sessions.len());
        secret
    }

    pub fn unregister(&self, secret: i32) {
        let mut sessions = self.sessions.write();
        if sessions.remove(&secret).is_some() {
            debug!("session {} unregistered, {} live", secret, sessions.len());
        }
    }

    /// Interrupt the statement of the session owning `secret`. Unknown
    /// secrets are ignored.
    pub fn cancel(&self, secret: i32) -> bool {
        let handle = self.sessions.read().get(&secret).cloned();
        match handle {
            Some(handle) => {
                info!("cancel request for session {}", secret);
                handle.cancel()
            }
            None => {
                debug!("cancel request for unknown session {}", secret);
                false
            }
        }
    }

    pub fn live(&self) -> usize {
        self.sessions.read().len()
    }
}
