//! Typed names and values exchanged with the coordination tree.

use std::time::Duration;

use config::CoordinatorConfig;

use crate::error::{CoordinationError, CoordinationResult};
use crate::paths::validate_segment;

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

macro_rules! segment_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Validate `value` as a single path segment.
            pub fn new(value: impl Into<String>) -> CoordinationResult<Self> {
                let value = value.into();
                validate_segment(&value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

segment_name!(
    /// Caller-supplied collection identifier.
    CollectionName
);

segment_name!(
    /// Name of a configuration bundle stored under the configs root.
    BundleName
);

segment_name!(
    /// Address under which a host announces its membership.
    HostAddress
);

impl HostAddress {
    /// The local host's network name.
    pub fn local() -> CoordinationResult<Self> {
        let name = hostname::get()
            .map_err(|e| CoordinationError::AddressResolution(e.to_string()))?
            .into_string()
            .map_err(|raw| {
                CoordinationError::AddressResolution(format!(
                    "host name {raw:?} is not valid UTF-8"
                ))
            })?;
        Self::new(name).map_err(|e| CoordinationError::AddressResolution(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Default bound on waiting for a new session to become ready.
pub const DEFAULT_CONNECT_WAIT: Duration = Duration::from_millis(5000);

/// Default per-call deadline for path operations.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default client-side session timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Where and how to reach the coordination ensemble. Immutable once a
/// session is opened with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    connect_string: String,
    client_timeout: Duration,
    host_address: Option<HostAddress>,
    connect_wait: Duration,
    request_timeout: Duration,
}

impl ClusterEndpoint {
    pub fn new(connect_string: impl Into<String>, client_timeout: Duration) -> Self {
        Self {
            connect_string: connect_string.into(),
            client_timeout,
            host_address: None,
            connect_wait: DEFAULT_CONNECT_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build an endpoint from the coordinator config.
    pub fn from_config(config: &CoordinatorConfig) -> CoordinationResult<Self> {
        let coordination = config.coordination();
        let host_address = config
            .host_address()
            .map(HostAddress::new)
            .transpose()
            .map_err(|e| CoordinationError::Config(e.to_string()))?;
        Ok(Self {
            connect_string: coordination.connect_string.clone(),
            client_timeout: coordination.client_timeout,
            host_address,
            connect_wait: coordination.connect_wait,
            request_timeout: coordination.request_timeout,
        })
    }

    pub fn with_host_address(mut self, address: HostAddress) -> Self {
        self.host_address = Some(address);
        self
    }

    pub fn with_connect_wait(mut self, wait: Duration) -> Self {
        self.connect_wait = wait;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_string(&self) -> &str {
        &self.connect_string
    }

    pub fn client_timeout(&self) -> Duration {
        self.client_timeout
    }

    pub fn host_address(&self) -> Option<&HostAddress> {
        self.host_address.as_ref()
    }

    pub fn connect_wait(&self) -> Duration {
        self.connect_wait
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of creating a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Result of announcing membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new membership entry was written.
    Registered { path: String },
    /// The entry was already present; nothing changed.
    AlreadyRegistered { path: String },
}

impl RegistrationOutcome {
    pub fn path(&self) -> &str {
        match self {
            RegistrationOutcome::Registered { path }
            | RegistrationOutcome::AlreadyRegistered { path } => path,
        }
    }
}

impl From<(CreateOutcome, String)> for RegistrationOutcome {
    fn from((outcome, path): (CreateOutcome, String)) -> Self {
        match outcome {
            CreateOutcome::Created => RegistrationOutcome::Registered { path },
            CreateOutcome::AlreadyExists => RegistrationOutcome::AlreadyRegistered { path },
        }
    }
}
