//! Cluster membership announcements.

use std::sync::Arc;

use bytes::Bytes;
use config::MembershipMode;
use tracing::{debug, info};

use crate::error::CoordinationResult;
use crate::models::{HostAddress, RegistrationOutcome};
use crate::paths::PathLayout;
use crate::session::Session;

/// Publishes this host's address under the membership root.
#[derive(Debug, Clone)]
pub struct Registrar {
    session: Arc<Session>,
    layout: PathLayout,
    mode: MembershipMode,
}

impl Registrar {
    pub fn new(session: Arc<Session>, layout: PathLayout, mode: MembershipMode) -> Self {
        Self {
            session,
            layout,
            mode,
        }
    }

    /// Resolve the address to announce: the explicit one, else the local
    /// host name.
    pub fn resolve_address(address: Option<&HostAddress>) -> CoordinationResult<HostAddress> {
        match address {
            Some(address) => Ok(address.clone()),
            None => {
                let address = HostAddress::local()?;
                debug!(%address, "using local host name as membership address");
                Ok(address)
            }
        }
    }

    /// Create the membership entry (and missing ancestors). Registering an
    /// address that is already present is not an error.
    pub async fn register(&self, address: &HostAddress) -> CoordinationResult<RegistrationOutcome> {
        let path = self.layout.membership(address);
        let created = self.session.ensure_path(&path, Bytes::new()).await?;
        let outcome = RegistrationOutcome::from((created, path));
        match &outcome {
            RegistrationOutcome::Registered { path } => {
                info!(%address, path, mode = ?self.mode, "registered cluster membership")
            }
            RegistrationOutcome::AlreadyRegistered { path } => {
                info!(%address, path, "cluster membership already registered")
            }
        }
        Ok(outcome)
    }

    /// Remove the entry again, but only for ephemeral membership. Returns
    /// whether an entry was removed.
    pub async fn release(&self, address: &HostAddress) -> CoordinationResult<bool> {
        if self.mode != MembershipMode::Ephemeral {
            debug!(%address, "persistent membership kept on close");
            return Ok(false);
        }
        let path = self.layout.membership(address);
        let removed = self.session.delete(&path).await?;
        info!(%address, path, removed, "released ephemeral cluster membership");
        Ok(removed)
    }

    pub fn mode(&self) -> MembershipMode {
        self.mode
    }
}
