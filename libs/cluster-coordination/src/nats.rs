//! Coordination tree on NATS JetStream KV.
//!
//! Every node of the tree is one key in a single KV bucket. The key is the
//! node's path with characters NATS does not accept in keys escaped as
//! `_XX` (hex of each UTF-8 byte), so child names survive a round trip.
//! Parents are not implied: like any ZooKeeper-style tree, a node can only be
//! created under an existing one.
//!
//! Known limit: the parent check and the create are two separate KV calls,
//! not one transaction. A parent deleted concurrently in between leaves the
//! new node orphaned under a missing parent.

use std::sync::Arc;

use async_nats::jetstream::{self, kv};
use async_nats::{ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{ClusterEndpoint, CreateOutcome};
use crate::paths::{self, validate_path};
use crate::store::{Connector, CoordinationStore, ReadinessSignal};

/// History kept per key; the tree only needs the latest value.
const KV_HISTORY: i64 = 1;

/// [`Connector`] that opens NATS connections.
///
/// The connect string is a comma separated list of server URLs. The initial
/// connection is established in the background, readiness is reported from
/// the client's event callback.
#[derive(Debug, Clone)]
pub struct NatsConnector {
    bucket: String,
}

impl NatsConnector {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }

    /// Create a connector from the coordination config.
    pub fn from_config(config: &config::CoordinationConfig) -> Self {
        Self::new(config.bucket.clone())
    }

    fn servers(endpoint: &ClusterEndpoint) -> CoordinationResult<Vec<String>> {
        let servers: Vec<String> = endpoint
            .connect_string()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        if servers.is_empty() {
            return Err(CoordinationError::ConnectIo {
                connect_string: endpoint.connect_string().to_owned(),
                reason: "no servers in connect string".into(),
            });
        }
        Ok(servers)
    }

    fn connect_options(endpoint: &ClusterEndpoint, readiness: ReadinessSignal) -> ConnectOptions {
        ConnectOptions::new()
            .connection_timeout(endpoint.client_timeout())
            .request_timeout(Some(endpoint.request_timeout()))
            .retry_on_initial_connect()
            .event_callback(move |event| {
                let readiness = readiness.clone();
                async move {
                    match event {
                        Event::Connected => {
                            debug!("nats connection ready");
                            readiness.connected();
                        }
                        Event::Disconnected => {
                            warn!("nats connection lost, client reconnecting");
                            readiness.disconnected();
                        }
                        other => debug!(event = %other, "nats client event"),
                    }
                }
            })
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn connect(
        &self,
        endpoint: &ClusterEndpoint,
        readiness: ReadinessSignal,
    ) -> CoordinationResult<Arc<dyn CoordinationStore>> {
        let servers = Self::servers(endpoint)?;
        info!(?servers, bucket = %self.bucket, "connecting to NATS");

        let client = Self::connect_options(endpoint, readiness)
            .connect(servers)
            .await
            .map_err(|e| CoordinationError::ConnectIo {
                connect_string: endpoint.connect_string().to_owned(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(NatsKvStore::new(client, self.bucket.clone())))
    }
}

/// Live handles; dropped together on close so the connection goes away.
struct Handles {
    client: async_nats::Client,
    kv: Option<kv::Store>,
}

/// [`CoordinationStore`] backed by one JetStream KV bucket.
pub struct NatsKvStore {
    inner: RwLock<Option<Handles>>,
    bucket: String,
}

impl NatsKvStore {
    pub fn new(client: async_nats::Client, bucket: String) -> Self {
        Self {
            inner: RwLock::new(Some(Handles { client, kv: None })),
            bucket,
        }
    }

    /// Get the bucket, creating it on first use.
    async fn kv(&self) -> CoordinationResult<kv::Store> {
        {
            let inner = self.inner.read().await;
            match inner.as_ref() {
                Some(Handles { kv: Some(kv), .. }) => return Ok(kv.clone()),
                Some(_) => {}
                None => {
                    return Err(CoordinationError::NotConnected(
                        "NATS client closed".into(),
                    ));
                }
            }
        }

        let mut inner = self.inner.write().await;
        let handles = inner
            .as_mut()
            .ok_or_else(|| CoordinationError::NotConnected("NATS client closed".into()))?;
        if let Some(kv) = &handles.kv {
            return Ok(kv.clone());
        }

        let js = jetstream::new(handles.client.clone());
        let store = match js.get_key_value(self.bucket.clone()).await {
            Ok(store) => store,
            Err(get_err) => {
                debug!(bucket = %self.bucket, error = %get_err, "creating missing JetStream KV bucket");
                js.create_key_value(kv::Config {
                    bucket: self.bucket.clone(),
                    history: KV_HISTORY,
                    ..Default::default()
                })
                .await
                .map_err(|create_err| {
                    CoordinationError::coordination(
                        "open_bucket",
                        "/",
                        format!(
                            "failed to create JetStream KV bucket '{}': {create_err} (get error: {get_err})",
                            self.bucket
                        ),
                    )
                })?
            }
        };
        handles.kv = Some(store.clone());
        Ok(store)
    }

    async fn read(&self, store: &kv::Store, path: &str) -> CoordinationResult<Option<Bytes>> {
        store
            .get(encode_key(path))
            .await
            .map_err(|e| CoordinationError::coordination("get", path, e))
    }

    /// Keys of every node strictly below `path`, decoded back to paths.
    async fn descendants(&self, store: &kv::Store, path: &str) -> CoordinationResult<Vec<String>> {
        let prefix = if path == "/" {
            "/".to_owned()
        } else {
            format!("{}/", encode_key(path))
        };
        let mut keys = store
            .keys()
            .await
            .map_err(|e| CoordinationError::coordination("list", path, e))?;

        let mut out = Vec::new();
        while let Some(key) = keys
            .try_next()
            .await
            .map_err(|e| CoordinationError::coordination("list", path, e))?
        {
            if key.starts_with(&prefix) {
                out.push(decode_key(&key).map_err(|reason| {
                    CoordinationError::coordination("list", path, reason)
                })?);
            }
        }
        Ok(out)
    }

    async fn node_exists(&self, store: &kv::Store, path: &str) -> CoordinationResult<bool> {
        if path == "/" {
            return Ok(true);
        }
        Ok(self.read(store, path).await?.is_some())
    }
}

#[async_trait]
impl CoordinationStore for NatsKvStore {
    async fn create(&self, path: &str, data: Bytes) -> CoordinationResult<CreateOutcome> {
        validate_path(path)?;
        if path == "/" {
            return Ok(CreateOutcome::AlreadyExists);
        }
        let store = self.kv().await?;
        let parent = paths::parent(path).unwrap_or("/");
        if !self.node_exists(&store, parent).await? {
            return Err(CoordinationError::NotFound(parent.to_owned()));
        }
        match store.create(&encode_key(path), data).await {
            Ok(revision) => {
                debug!(path, revision, "created node");
                Ok(CreateOutcome::Created)
            }
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(CoordinationError::coordination("create", path, e)),
        }
    }

    async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        validate_path(path)?;
        let store = self.kv().await?;
        self.node_exists(&store, path).await
    }

    async fn get_data(&self, path: &str) -> CoordinationResult<Bytes> {
        validate_path(path)?;
        let store = self.kv().await?;
        self.read(&store, path)
            .await?
            .ok_or_else(|| CoordinationError::NotFound(path.to_owned()))
    }

    async fn children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        validate_path(path)?;
        let store = self.kv().await?;
        if !self.node_exists(&store, path).await? {
            return Err(CoordinationError::NotFound(path.to_owned()));
        }
        let children = self
            .descendants(&store, path)
            .await?
            .into_iter()
            .filter(|child| paths::parent(child) == Some(path))
            .map(|child| paths::name(&child).to_owned())
            .collect();
        Ok(children)
    }

    async fn delete(&self, path: &str) -> CoordinationResult<bool> {
        validate_path(path)?;
        let store = self.kv().await?;
        if !self.node_exists(&store, path).await? || path == "/" {
            return Ok(false);
        }
        if !self.descendants(&store, path).await?.is_empty() {
            return Err(CoordinationError::coordination(
                "delete",
                path,
                "node has children",
            ));
        }
        store
            .delete(encode_key(path))
            .await
            .map_err(|e| CoordinationError::coordination("delete", path, e))?;
        Ok(true)
    }

    async fn close(&self) -> CoordinationResult<()> {
        let handles = self.inner.write().await.take();
        if let Some(handles) = handles {
            handles
                .client
                .flush()
                .await
                .map_err(|e| CoordinationError::coordination("close", "/", e))?;
            info!(bucket = %self.bucket, "NATS client disconnected");
        }
        Ok(())
    }
}

impl std::fmt::Debug for NatsKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsKvStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

fn is_plain_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'/' | b'=')
}

/// Map a tree path onto a KV key.
pub(crate) fn encode_key(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        if is_plain_key_byte(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("_{b:02X}"));
        }
    }
    out
}

/// Inverse of [`encode_key`].
pub(crate) fn decode_key(key: &str) -> Result<String, String> {
    let raw = key.as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'_' {
            let hex = key
                .get(i + 1..i + 3)
                .ok_or_else(|| format!("truncated escape in key '{key}'"))?;
            let b = u8::from_str_radix(hex, 16)
                .map_err(|_| format!("bad escape '_{hex}' in key '{key}'"))?;
            bytes.push(b);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).map_err(|_| format!("key '{key}' does not decode to UTF-8"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
