//! Session management module
//!
//! Tracks live sessions and provides cancellation, individually or all at once
//! on shutdown.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::logger::log;

/// Unique session identifier
pub type SessionId = u64;

/// Active session handle with cancellation support
#[derive(Debug)]
struct ActiveSession {
    peer_addr: SocketAddr,
    started_at: Instant,
    cancel_token: CancellationToken,
}

/// Registry of live sessions
#[derive(Debug, Clone)]
pub struct SessionManager {
    /// Counter for generating unique session IDs
    next_id: Arc<AtomicU64>,
    sessions: Arc<DashMap<SessionId, ActiveSession>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Register a new session and return its ID and cancellation token
    pub fn register(&self, peer_addr: SocketAddr) -> (SessionId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel_token = CancellationToken::new();

        self.sessions.insert(
            id,
            ActiveSession {
                peer_addr,
                started_at: Instant::now(),
                cancel_token: cancel_token.clone(),
            },
        );

        (id, cancel_token)
    }

    /// Unregister a session; unknown IDs are ignored
    pub fn unregister(&self, id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&id) {
            log::debug!(
                session_id = id,
                peer = %session.peer_addr,
                elapsed_ms = session.started_at.elapsed().as_millis() as u64,
                "Session unregistered"
            );
        }
    }

    /// Cancel one session. Returns `false` if it is not registered.
    pub fn cancel(&self, id: SessionId) -> bool {
        match self.sessions.get(&id) {
            Some(session) => {
                session.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live session (shutdown)
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for session in self.sessions.iter() {
            session.cancel_token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    /// Get the number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
