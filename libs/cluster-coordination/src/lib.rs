//! # cluster-coordination
//!
//! Cluster configuration coordination over a hierarchical coordination
//! store.
//!
//! This library provides:
//! - **Session handle** with bounded connection wait, per-call deadlines,
//!   interruption and repeatable close.
//! - **Registrar** announcing this host under the membership root.
//! - **Config resolver** mapping a collection to its configuration bundle
//!   through a `config=<bundle>` child node.
//! - **Bundle file store** reading raw files from a bundle.
//! - **Coordinator facade** tying the above together and handing bundle
//!   files to caller-supplied schema and config parsers.
//!
//! Two store backends ship with the crate: a JetStream KV backend for
//! running clusters and an in-memory ensemble for tests and local runs.

pub mod bundle;
pub mod coordinator;
pub mod documents;
pub mod error;
pub mod memory;
pub mod models;
pub mod nats;
pub mod paths;
pub mod registrar;
pub mod resolver;
pub mod session;
pub mod store;

pub use bundle::BundleFileStore;
pub use config::{CoordinatorConfig, MembershipMode};
pub use coordinator::{ClusterCoordinator, CoordinatorOptions};
pub use documents::{ConfigParser, SchemaParser};
pub use error::{BoxError, CoordinationError, CoordinationResult};
pub use memory::{MemoryConnector, MemoryEnsemble};
pub use models::{
    BundleName, ClusterEndpoint, CollectionName, CreateOutcome, HostAddress, RegistrationOutcome,
};
pub use nats::NatsConnector;
pub use paths::PathLayout;
pub use registrar::Registrar;
pub use resolver::ConfigResolver;
pub use session::Session;
pub use store::{Connector, CoordinationStore, ReadinessSignal, SessionState};
