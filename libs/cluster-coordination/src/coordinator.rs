//! Coordinator facade: one session, one membership entry, one bundle.
//!
//! Opening a coordinator connects, registers this host, and resolves the
//! collection's bundle, in that order. Any failure along the way tears the
//! session down again and is returned to the caller.

use std::sync::Arc;

use bytes::Bytes;
use config::{CoordinatorConfig, MembershipMode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bundle::BundleFileStore;
use crate::documents::{ConfigParser, SchemaParser};
use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{BundleName, ClusterEndpoint, CollectionName, HostAddress};
use crate::paths::{PathLayout, validate_segment};
use crate::registrar::Registrar;
use crate::resolver::ConfigResolver;
use crate::session::Session;
use crate::store::{Connector, SessionState};

/// Everything needed to open a [`ClusterCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    endpoint: ClusterEndpoint,
    collection: CollectionName,
    layout: PathLayout,
    membership: MembershipMode,
    default_config_file: String,
}

impl CoordinatorOptions {
    pub fn new(endpoint: ClusterEndpoint, collection: CollectionName) -> Self {
        Self {
            endpoint,
            collection,
            layout: PathLayout::with_defaults(),
            membership: MembershipMode::default(),
            default_config_file: config::wire::DEFAULT_CONFIG_FILE.to_owned(),
        }
    }

    /// Build options from the coordinator config.
    pub fn from_config(config: &CoordinatorConfig) -> CoordinationResult<Self> {
        let collection = CollectionName::new(config.collection())
            .map_err(|e| CoordinationError::Config(e.to_string()))?;
        Self {
            endpoint: ClusterEndpoint::from_config(config)?,
            collection,
            layout: PathLayout::new(config.paths().clone())?,
            membership: config.membership(),
            default_config_file: config.default_config_file().to_owned(),
        }
        .checked()
    }

    pub fn with_layout(mut self, layout: PathLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_membership(mut self, membership: MembershipMode) -> Self {
        self.membership = membership;
        self
    }

    pub fn with_default_config_file(mut self, file_name: impl Into<String>) -> Self {
        self.default_config_file = file_name.into();
        self
    }

    pub fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    fn checked(self) -> CoordinationResult<Self> {
        validate_segment(&self.default_config_file)
            .map_err(|e| CoordinationError::Config(format!("default config file: {e}")))?;
        Ok(self)
    }
}

/// Ready-to-use cluster coordinator.
#[derive(Debug)]
pub struct ClusterCoordinator {
    session: Arc<Session>,
    layout: PathLayout,
    registrar: Registrar,
    files: BundleFileStore,
    collection: CollectionName,
    address: HostAddress,
    bundle: BundleName,
    default_config_file: String,
}

impl ClusterCoordinator {
    /// Connect, register, and resolve the collection's bundle.
    pub async fn open(
        options: CoordinatorOptions,
        connector: &dyn Connector,
    ) -> CoordinationResult<Self> {
        Self::open_with_interrupt(options, connector, CancellationToken::new()).await
    }

    /// Like [`ClusterCoordinator::open`]; cancelling `interrupt` aborts startup
    /// and, later, any in-flight call.
    pub async fn open_with_interrupt(
        options: CoordinatorOptions,
        connector: &dyn Connector,
        interrupt: CancellationToken,
    ) -> CoordinationResult<Self> {
        let options = options.checked()?;
        let address = Registrar::resolve_address(options.endpoint.host_address())?;

        let session = Arc::new(
            Session::open_with_interrupt(options.endpoint.clone(), connector, interrupt).await?,
        );
        let registrar = Registrar::new(
            Arc::clone(&session),
            options.layout.clone(),
            options.membership,
        );

        if let Err(err) = registrar.register(&address).await {
            abort(&session, None).await;
            return Err(err);
        }

        let resolver = ConfigResolver::new(Arc::clone(&session), options.layout.clone());
        let bundle = match resolver.resolve(&options.collection).await {
            Ok(bundle) => bundle,
            Err(err) => {
                abort(&session, Some((&registrar, &address))).await;
                return Err(err);
            }
        };

        info!(
            collection = %options.collection,
            %bundle,
            %address,
            "cluster coordinator ready"
        );

        Ok(Self {
            files: BundleFileStore::new(Arc::clone(&session)),
            session,
            layout: options.layout,
            registrar,
            collection: options.collection,
            address,
            bundle,
            default_config_file: options.default_config_file,
        })
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Address this host registered under.
    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    /// Bundle resolved at open; fixed for the coordinator's lifetime.
    pub fn bundle_name(&self) -> &BundleName {
        &self.bundle
    }

    /// `<configs>/<bundle>`
    pub fn bundle_path(&self) -> String {
        self.layout.bundle(&self.bundle)
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Raw bytes at `<bundle_path>/<file_name>`.
    pub async fn get_file(&self, bundle_path: &str, file_name: &str) -> CoordinationResult<Bytes> {
        self.files.fetch(bundle_path, file_name).await
    }

    /// Whether `path` exists in the coordination tree.
    pub async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        self.files.exists(path).await
    }

    /// Fetch a runtime configuration file from the resolved bundle and parse
    /// it. Without a file name the default configuration file is used.
    pub async fn get_config<P>(
        &self,
        parser: &P,
        file_name: Option<&str>,
        loader: &P::Loader,
    ) -> CoordinationResult<P::Config>
    where
        P: ConfigParser,
    {
        let file_name = file_name.unwrap_or(&self.default_config_file);
        let bytes = self.get_file(&self.bundle_path(), file_name).await?;
        parser
            .parse_config(loader, file_name, &bytes)
            .map_err(|source| CoordinationError::Parse {
                file: file_name.to_owned(),
                source,
            })
    }

    /// Fetch a schema file from the resolved bundle and parse it against
    /// `config`.
    pub async fn get_schema<P>(
        &self,
        parser: &P,
        file_name: &str,
        config: &P::Config,
        loader: &P::Loader,
    ) -> CoordinationResult<P::Schema>
    where
        P: SchemaParser,
    {
        let bytes = self.get_file(&self.bundle_path(), file_name).await?;
        parser
            .parse_schema(config, loader, file_name, &bytes)
            .map_err(|source| CoordinationError::Parse {
                file: file_name.to_owned(),
                source,
            })
    }

    /// Abort in-flight and later calls with `Interrupted`.
    pub fn interrupt(&self) {
        self.session.interrupt();
    }

    /// Release ephemeral membership, then the session. Safe to call
    /// repeatedly.
    pub async fn close(&self) -> CoordinationResult<()> {
        if self.session.state() == SessionState::Closed {
            debug!("cluster coordinator already closed");
            return Ok(());
        }
        let released = if self.session.is_interrupted() {
            // the session refuses calls now; the entry is left behind
            warn!(address = %self.address, "skipping membership release on interrupted session");
            Ok(false)
        } else {
            self.registrar.release(&self.address).await
        };
        let closed = self.session.close().await;
        released.and(closed)
    }
}

/// Best-effort teardown after a failed startup step.
async fn abort(session: &Session, registered: Option<(&Registrar, &HostAddress)>) {
    if let Some((registrar, address)) = registered {
        if !session.is_interrupted() {
            if let Err(err) = registrar.release(address).await {
                warn!(error = %err, "failed to release membership after failed startup");
            }
        }
    }
    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to close session after failed startup");
    }
}
