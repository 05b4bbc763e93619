//! Session lifecycle: connect, wait until ready, guarded calls, close.
//!
//! Opening a session blocks until the backend reports readiness, the connect
//! wait bound elapses, or the caller interrupts. Every later call runs under
//! a deadline and the session's interrupt token, so no blocking call can hang
//! forever or swallow an interruption.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{ClusterEndpoint, CreateOutcome};
use crate::paths::{self, validate_path};
use crate::store::{Connector, CoordinationStore, ReadinessSignal, SessionState};

/// A live connection to the coordination service.
///
/// Exclusively owned by one coordinator; share it behind an `Arc`.
pub struct Session {
    endpoint: ClusterEndpoint,
    store: Arc<dyn CoordinationStore>,
    readiness: ReadinessSignal,
    state: watch::Receiver<SessionState>,
    interrupt: CancellationToken,
    closed: AtomicBool,
}

impl Session {
    /// Connect to `endpoint` and wait until the session is live.
    pub async fn open(
        endpoint: ClusterEndpoint,
        connector: &dyn Connector,
    ) -> CoordinationResult<Self> {
        Self::open_with_interrupt(endpoint, connector, CancellationToken::new()).await
    }

    /// Like [`Session::open`], but cancelling `interrupt` aborts the wait and
    /// every later call on the session with [`CoordinationError::Interrupted`].
    pub async fn open_with_interrupt(
        endpoint: ClusterEndpoint,
        connector: &dyn Connector,
        interrupt: CancellationToken,
    ) -> CoordinationResult<Self> {
        let interrupt = interrupt.child_token();
        let (readiness, state) = ReadinessSignal::channel();
        let started = Instant::now();
        // one bound covers both starting the transport and waiting for readiness
        let deadline = started + endpoint.connect_wait();

        info!(
            connect_string = endpoint.connect_string(),
            client_timeout_ms = endpoint.client_timeout().as_millis() as u64,
            connect_wait_ms = endpoint.connect_wait().as_millis() as u64,
            "opening coordination session"
        );

        let store = tokio::select! {
            biased;
            _ = interrupt.cancelled() => {
                warn!("interrupted while starting connection");
                return Err(CoordinationError::Interrupted { operation: "connect" });
            }
            res = tokio::time::timeout_at(deadline, connector.connect(&endpoint, readiness.clone())) => match res {
                Ok(res) => res?,
                Err(_) => {
                    warn!(waited_ms = endpoint.connect_wait().as_millis() as u64, "connection attempt did not return in time");
                    return Err(CoordinationError::ConnectTimeout {
                        connect_string: endpoint.connect_string().to_owned(),
                        waited: endpoint.connect_wait(),
                    });
                }
            },
        };

        let session = Self {
            endpoint,
            store,
            readiness,
            state,
            interrupt,
            closed: AtomicBool::new(false),
        };

        match session.wait_until_connected(deadline).await {
            Ok(()) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "coordination session established"
                );
                Ok(session)
            }
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    debug!(error = %close_err, "failed to release session after failed connect");
                }
                Err(err)
            }
        }
    }

    async fn wait_until_connected(&self, deadline: Instant) -> CoordinationResult<()> {
        let wait = self.endpoint.connect_wait();
        let mut state = self.state.clone();
        let settled = async move {
            state
                .wait_for(|s| *s != SessionState::Connecting)
                .await
                .map(|s| *s)
        };

        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => {
                warn!("interrupted while waiting for session");
                Err(CoordinationError::Interrupted { operation: "connect" })
            }
            res = tokio::time::timeout_at(deadline, settled) => match res {
                Ok(Ok(SessionState::Connected)) => Ok(()),
                Ok(Ok(other)) => Err(CoordinationError::ConnectIo {
                    connect_string: self.endpoint.connect_string().to_owned(),
                    reason: format!("session became {other} while connecting"),
                }),
                Ok(Err(_)) => Err(CoordinationError::ConnectIo {
                    connect_string: self.endpoint.connect_string().to_owned(),
                    reason: "readiness channel dropped".into(),
                }),
                Err(_) => {
                    warn!(waited_ms = wait.as_millis() as u64, "session not ready in time");
                    Err(CoordinationError::ConnectTimeout {
                        connect_string: self.endpoint.connect_string().to_owned(),
                        waited: wait,
                    })
                }
            },
        }
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> SessionState {
        if self.closed.load(Ordering::Acquire) {
            return SessionState::Closed;
        }
        *self.state.borrow()
    }

    pub fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    /// Abort in-flight calls; later calls fail with `Interrupted` as well.
    pub fn interrupt(&self) {
        self.interrupt.cancel();
    }

    /// Whether [`Session::interrupt`] (or the token passed at open) fired.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    fn ensure_usable(&self, operation: &'static str) -> CoordinationResult<()> {
        match self.state() {
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(CoordinationError::SessionClosed),
            SessionState::Connecting => Err(CoordinationError::NotConnected(format!(
                "{operation} issued while session is connecting"
            ))),
        }
    }

    /// Run one store call under the session's deadline and interrupt token.
    async fn guarded<T, F>(
        &self,
        operation: &'static str,
        path: &str,
        call: F,
    ) -> CoordinationResult<T>
    where
        F: Future<Output = CoordinationResult<T>>,
    {
        validate_path(path)?;
        self.ensure_usable(operation)?;
        let deadline = self.endpoint.request_timeout();

        tokio::select! {
            biased;
            _ = self.interrupt.cancelled() => {
                warn!(operation, path, "coordination call interrupted");
                Err(CoordinationError::Interrupted { operation })
            }
            res = tokio::time::timeout(deadline, call) => res.unwrap_or_else(|_| {
                warn!(operation, path, deadline_ms = deadline.as_millis() as u64, "coordination call timed out");
                Err(CoordinationError::OperationTimeout {
                    operation,
                    path: path.to_owned(),
                    after: deadline,
                })
            }),
        }
    }

    /// Create a single node; the parent must exist.
    pub async fn create(&self, path: &str, data: Bytes) -> CoordinationResult<CreateOutcome> {
        self.guarded("create", path, self.store.create(path, data))
            .await
    }

    /// Create `path` and any missing ancestors. Ancestors get empty payloads;
    /// the outcome reports whether `path` itself was new.
    pub async fn ensure_path(&self, path: &str, data: Bytes) -> CoordinationResult<CreateOutcome> {
        validate_path(path)?;
        for ancestor in paths::ancestors(path) {
            let outcome = self.create(ancestor, Bytes::new()).await?;
            debug!(path = ancestor, ?outcome, "ensured ancestor");
        }
        self.create(path, data).await
    }

    pub async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        self.guarded("exists", path, self.store.exists(path)).await
    }

    pub async fn get_data(&self, path: &str) -> CoordinationResult<Bytes> {
        self.guarded("get_data", path, self.store.get_data(path))
            .await
    }

    pub async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        self.guarded("children", path, self.store.children(path))
            .await
    }

    pub async fn delete(&self, path: &str) -> CoordinationResult<bool> {
        self.guarded("delete", path, self.store.delete(path)).await
    }

    /// Release the session. Safe to call repeatedly; later calls are no-ops.
    pub async fn close(&self) -> CoordinationResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("coordination session already closed");
            return Ok(());
        }
        self.interrupt.cancel();
        self.readiness.closed();

        let deadline = self.endpoint.request_timeout();
        tokio::time::timeout(deadline, self.store.close())
            .await
            .map_err(|_| CoordinationError::OperationTimeout {
                operation: "close",
                path: "/".into(),
                after: deadline,
            })??;
        info!(
            connect_string = self.endpoint.connect_string(),
            "coordination session closed"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
