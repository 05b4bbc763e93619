//! Process-local coordination ensemble.
//!
//! Backs tests and local development. Several sessions connected to the same
//! [`MemoryEnsemble`] observe each other's writes, like clients of a real
//! ensemble would.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{ClusterEndpoint, CreateOutcome};
use crate::paths::{self, validate_path};
use crate::store::{Connector, CoordinationStore, ReadinessSignal};

#[derive(Debug, Default)]
struct EnsembleInner {
    nodes: BTreeMap<String, Bytes>,
    faulty: bool,
    stalled: bool,
}

/// Shared in-memory tree of paths and payloads.
///
/// The root `/` always exists and is not stored.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnsemble {
    inner: Arc<Mutex<EnsembleInner>>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EnsembleInner> {
        // a panicking test must not poison the tree for the others
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `data` at `path`, creating missing ancestors with empty payloads.
    /// Overwrites an existing payload.
    pub fn put(&self, path: &str, data: impl Into<Bytes>) -> CoordinationResult<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(CoordinationError::invalid_path(path, "root holds no data"));
        }
        let mut inner = self.lock();
        for ancestor in paths::ancestors(path) {
            inner.nodes.entry(ancestor.to_owned()).or_default();
        }
        inner.nodes.insert(path.to_owned(), data.into());
        Ok(())
    }

    /// Whether `path` is present.
    pub fn contains(&self, path: &str) -> bool {
        path == "/" || self.lock().nodes.contains_key(path)
    }

    /// Every stored path below `prefix` (inclusive), sorted.
    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        let inner = self.lock();
        inner
            .nodes
            .keys()
            .filter(|p| *p == prefix || p.starts_with(&format!("{prefix}/")) || prefix == "/")
            .cloned()
            .collect()
    }

    /// Make every operation fail with a service error until cleared.
    pub fn set_faulty(&self, faulty: bool) {
        self.lock().faulty = faulty;
    }

    /// Make every operation hang until cleared.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    fn check(&self, operation: &'static str, path: &str) -> CoordinationResult<bool> {
        validate_path(path)?;
        let inner = self.lock();
        if inner.faulty {
            return Err(CoordinationError::coordination(
                operation,
                path,
                "ensemble unavailable",
            ));
        }
        Ok(inner.stalled)
    }

    fn create(&self, path: &str, data: Bytes) -> CoordinationResult<CreateOutcome> {
        if path == "/" {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let mut inner = self.lock();
        if inner.nodes.contains_key(path) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let parent_exists = match paths::parent(path) {
            Some("/") | None => true,
            Some(parent) => inner.nodes.contains_key(parent),
        };
        if !parent_exists {
            return Err(CoordinationError::NotFound(
                paths::parent(path).unwrap_or("/").to_owned(),
            ));
        }
        inner.nodes.insert(path.to_owned(), data);
        Ok(CreateOutcome::Created)
    }

    fn get_data(&self, path: &str) -> CoordinationResult<Bytes> {
        self.lock()
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NotFound(path.to_owned()))
    }

    fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        let inner = self.lock();
        if path != "/" && !inner.nodes.contains_key(path) {
            return Err(CoordinationError::NotFound(path.to_owned()));
        }
        let prefix = if path == "/" {
            "/".to_owned()
        } else {
            format!("{path}/")
        };
        let children = inner
            .nodes
            .range::<String, _>((Bound::Included(&prefix), Bound::Unbounded))
            .map(|(p, _)| p)
            .take_while(|p| p.starts_with(&prefix))
            .filter_map(|p| {
                let rest = &p[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_owned())
            })
            .collect();
        Ok(children)
    }

    fn delete(&self, path: &str) -> CoordinationResult<bool> {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(path) {
            return Ok(false);
        }
        let prefix = format!("{path}/");
        if inner.nodes.keys().any(|p| p.starts_with(&prefix)) {
            return Err(CoordinationError::coordination(
                "delete",
                path,
                "node has children",
            ));
        }
        inner.nodes.remove(path);
        Ok(true)
    }
}

/// One client's view of a [`MemoryEnsemble`].
#[derive(Debug)]
pub struct MemoryStore {
    ensemble: MemoryEnsemble,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(ensemble: MemoryEnsemble) -> Self {
        Self {
            ensemble,
            closed: AtomicBool::new(false),
        }
    }

    async fn enter(&self, operation: &'static str, path: &str) -> CoordinationResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordinationError::coordination(
                operation,
                path,
                "connection closed",
            ));
        }
        if self.ensemble.check(operation, path)? {
            debug!(operation, path, "memory ensemble stalled");
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(&self, path: &str, data: Bytes) -> CoordinationResult<CreateOutcome> {
        self.enter("create", path).await?;
        self.ensemble.create(path, data)
    }

    async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        self.enter("exists", path).await?;
        Ok(self.ensemble.contains(path))
    }

    async fn get_data(&self, path: &str) -> CoordinationResult<Bytes> {
        self.enter("get_data", path).await?;
        self.ensemble.get_data(path)
    }

    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        self.enter("children", path).await?;
        self.ensemble.children(path)
    }

    async fn delete(&self, path: &str) -> CoordinationResult<bool> {
        self.enter("delete", path).await?;
        self.ensemble.delete(path)
    }

    async fn close(&self) -> CoordinationResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reachability {
    /// readiness is reported after the delay
    Reachable(Duration),
    /// the attempt starts but readiness never arrives
    Unreachable,
    /// the attempt fails outright
    Refusing,
}

/// [`Connector`] for a [`MemoryEnsemble`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    ensemble: MemoryEnsemble,
    reachability: Reachability,
}

impl MemoryConnector {
    /// Connector whose sessions become ready immediately.
    pub fn new(ensemble: MemoryEnsemble) -> Self {
        Self {
            ensemble,
            reachability: Reachability::Reachable(Duration::ZERO),
        }
    }

    /// Readiness arrives `delay` after the attempt starts.
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.reachability = Reachability::Reachable(delay);
        self
    }

    /// Readiness never arrives.
    pub fn unreachable(mut self) -> Self {
        self.reachability = Reachability::Unreachable;
        self
    }

    /// The transport cannot be established at all.
    pub fn refusing(mut self) -> Self {
        self.reachability = Reachability::Refusing;
        self
    }

    pub fn ensemble(&self) -> &MemoryEnsemble {
        &self.ensemble
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &ClusterEndpoint,
        readiness: ReadinessSignal,
    ) -> CoordinationResult<Arc<dyn CoordinationStore>> {
        match self.reachability {
            Reachability::Refusing => {
                return Err(CoordinationError::ConnectIo {
                    connect_string: endpoint.connect_string().to_owned(),
                    reason: "connection refused".into(),
                });
            }
            Reachability::Unreachable => {
                debug!(
                    connect_string = endpoint.connect_string(),
                    "memory ensemble unreachable, readiness will not arrive"
                );
            }
            Reachability::Reachable(delay) => {
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    readiness.connected();
                });
            }
        }
        Ok(Arc::new(MemoryStore::new(self.ensemble.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (MemoryEnsemble, MemoryStore) {
        let ensemble = MemoryEnsemble::new();
        (ensemble.clone(), MemoryStore::new(ensemble))
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let (_, store) = store();
        let err = store.create("/a/b", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotFound(p) if p == "/a"));

        assert_eq!(
            store.create("/a", Bytes::new()).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create("/a/b", Bytes::new()).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create("/a/b", Bytes::from_static(b"x")).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        // existing payload untouched
        assert!(store.get_data("/a/b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exists_and_data() {
        let (ensemble, store) = store();
        assert!(!store.exists("/configs/b/schema.xml").await.unwrap());
        ensemble.put("/configs/b/schema.xml", "<schema/>").unwrap();
        assert!(store.exists("/configs").await.unwrap());
        assert!(store.exists("/configs/b/schema.xml").await.unwrap());
        assert_eq!(
            store.get_data("/configs/b/schema.xml").await.unwrap(),
            Bytes::from_static(b"<schema/>")
        );
        assert!(store.get_data("/configs/b/missing").await.unwrap_err().is_not_found());
        assert!(store.exists("/").await.unwrap());
    }

    #[tokio::test]
    async fn test_children_are_immediate_names() {
        let (ensemble, store) = store();
        ensemble.put("/collections/films/config=x", "").unwrap();
        ensemble.put("/collections/films/shards/s1", "").unwrap();
        ensemble.put("/collections/filmsArchive", "").unwrap();

        let mut children = store.children("/collections/films").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["config=x", "shards"]);

        let children = store.children("/").await.unwrap();
        assert_eq!(children, vec!["collections"]);

        assert!(store.children("/collections/books").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete() {
        let (ensemble, store) = store();
        ensemble.put("/hosts/a", "").unwrap();
        assert!(matches!(
            store.delete("/hosts").await.unwrap_err(),
            CoordinationError::Coordination { .. }
        ));
        assert!(store.delete("/hosts/a").await.unwrap());
        assert!(!store.delete("/hosts/a").await.unwrap());
        assert!(!ensemble.contains("/hosts/a"));
        assert!(ensemble.contains("/hosts"));
    }

    #[tokio::test]
    async fn test_faulty_and_closed() {
        let (ensemble, store) = store();
        ensemble.set_faulty(true);
        assert!(matches!(
            store.exists("/a").await.unwrap_err(),
            CoordinationError::Coordination { operation: "exists", .. }
        ));
        ensemble.set_faulty(false);
        assert!(!store.exists("/a").await.unwrap());

        store.close().await.unwrap();
        assert!(matches!(
            store.exists("/a").await.unwrap_err(),
            CoordinationError::Coordination { .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let (ensemble, store) = store();
        assert!(matches!(
            store.exists("relative").await.unwrap_err(),
            CoordinationError::InvalidPath { .. }
        ));
        assert!(ensemble.put("/", "x").is_err());
    }

    #[tokio::test]
    async fn test_paths_under() {
        let ensemble = MemoryEnsemble::new();
        ensemble.put("/hosts/a", "").unwrap();
        ensemble.put("/hostsX", "").unwrap();
        assert_eq!(ensemble.paths_under("/hosts"), vec!["/hosts", "/hosts/a"]);
    }

    #[tokio::test]
    async fn test_refusing_connector() {
        let connector = MemoryConnector::new(MemoryEnsemble::new()).refusing();
        let (signal, _rx) = ReadinessSignal::channel();
        let endpoint = ClusterEndpoint::new("memory://test", Duration::from_secs(1));
        let err = connector.connect(&endpoint, signal).await.unwrap_err();
        assert!(matches!(err, CoordinationError::ConnectIo { .. }));
    }
}
