//! Live-session bookkeeping shared by the accept loop and every handler.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

struct RegistryState {
    running: bool,
    next_id: u64,
    sessions: HashMap<u64, CancellationToken>,
}

/// Tracks every open session so an authenticated shutdown can close them
/// all. Registration and shutdown take the same lock: a session is either
/// registered before shutdown (and gets cancelled by it) or refused.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    stop: CancellationToken,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState {
                running: true,
                next_id: 0,
                sessions: HashMap::new(),
            }),
            stop: CancellationToken::new(),
        })
    }

    /// Track a new session. `None` once shutdown has begun.
    pub fn register(self: &Arc<Self>) -> Option<SessionGuard> {
        let mut state = self.state.lock();
        if !state.running {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        let token = CancellationToken::new();
        state.sessions.insert(id, token.clone());
        Some(SessionGuard {
            id,
            token,
            registry: Arc::clone(self),
        })
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn live_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Stop accepting and cancel every tracked session. Returns how many
    /// sessions were told to close; later calls return 0.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        if !state.running {
            return 0;
        }
        state.running = false;
        for token in state.sessions.values() {
            token.cancel();
        }
        self.stop.cancel();
        let count = state.sessions.len();
        info!(sessions = count, "server shutdown requested");
        count
    }

    /// Resolves once [`shutdown`](Self::shutdown) has run.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }
}

/// Registration handle held by a running session. Dropping it removes the
/// session from the registry.
pub struct SessionGuard {
    id: u64,
    token: CancellationToken,
    registry: Arc<SessionRegistry>,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.state.lock().sessions.remove(&self.id);
    }
}
