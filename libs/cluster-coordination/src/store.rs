//! Seams between the session and a concrete coordination service.
//!
//! A [`Connector`] starts a connection attempt and hands back a
//! [`CoordinationStore`]; readiness is reported asynchronously on the
//! [`ReadinessSignal`] from the backend's own background task.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::CoordinationResult;
use crate::models::{ClusterEndpoint, CreateOutcome};

/// Hierarchical, path-addressed store offered by the coordination service.
///
/// Paths are absolute (`/a/b`). Implementations must not retry or cache.
#[async_trait]
pub trait CoordinationStore: Send + Sync + std::fmt::Debug {
    /// Create `path` holding `data`. The parent must already exist
    /// (`NotFound` otherwise); an existing node is reported, not an error.
    async fn create(&self, path: &str, data: Bytes) -> CoordinationResult<CreateOutcome>;

    /// Whether `path` currently exists.
    async fn exists(&self, path: &str) -> CoordinationResult<bool>;

    /// Payload stored at `path`, `NotFound` if there is no such node.
    async fn get_data(&self, path: &str) -> CoordinationResult<Bytes>;

    /// Names (not paths) of the immediate children of `path`, `NotFound` if
    /// there is no such node. Order is backend defined.
    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// Remove a leaf node. Returns false if it did not exist.
    async fn delete(&self, path: &str) -> CoordinationResult<bool>;

    /// Release the transport. Called once by the owning session.
    async fn close(&self) -> CoordinationResult<()> {
        Ok(())
    }
}

/// Starts connections to a coordination service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Begin connecting to `endpoint`. Returning does not mean the session is
    /// usable; the backend flips `readiness` to connected once it is.
    ///
    /// Errors here are transport failures that make waiting pointless.
    async fn connect(
        &self,
        endpoint: &ClusterEndpoint,
        readiness: ReadinessSignal,
    ) -> CoordinationResult<Arc<dyn CoordinationStore>>;
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet (or no longer) confirmed live by the service.
    Connecting,
    /// Usable.
    Connected,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Write side of the session state, handed to backends.
///
/// `Closed` is terminal: later notifications are ignored.
#[derive(Debug, Clone)]
pub struct ReadinessSignal {
    tx: Arc<watch::Sender<SessionState>>,
}

impl ReadinessSignal {
    pub(crate) fn channel() -> (Self, watch::Receiver<SessionState>) {
        let (tx, rx) = watch::channel(SessionState::Connecting);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// The service confirmed the session.
    pub fn connected(&self) {
        self.transition(SessionState::Connected);
    }

    /// The transport dropped; the backend is trying to get it back.
    pub fn disconnected(&self) {
        self.transition(SessionState::Connecting);
    }

    /// The session is gone for good.
    pub fn closed(&self) {
        self.transition(SessionState::Closed);
    }

    /// Current phase.
    pub fn state(&self) -> SessionState {
        *self.tx.borrow()
    }

    fn transition(&self, next: SessionState) {
        self.tx.send_if_modified(|state| {
            if *state == SessionState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}
