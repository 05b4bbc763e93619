use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub mod wire;

pub use wire::{MembershipMode, PathRoots};

/// coordinator config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    coordination: CoordinationConfig,
    collection: String,
    host_address: Option<String>,
    membership: MembershipMode,
    default_config_file: String,
    paths: PathRoots,
    path: Option<PathBuf>,
}

/// connection settings for the coordination ensemble
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationConfig {
    pub connect_string: String,
    pub bucket: String,
    pub client_timeout: Duration,
    pub connect_wait: Duration,
    pub request_timeout: Duration,
}

impl CoordinatorConfig {
    /// read & validate the config at `path`, YAML (or JSON, which is valid YAML)
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to find config at {}", &path.display()))?;
        let mut config = Self::parse_str(s)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// validate a config held in memory
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let wire: wire::Config =
            serde_yaml::from_str(s.as_ref()).context("failed to decode config")?;
        let config = Self::try_from(wire)?;
        debug!(?config);
        Ok(config)
    }

    pub fn coordination(&self) -> &CoordinationConfig {
        &self.coordination
    }
    pub fn collection(&self) -> &str {
        &self.collection
    }
    pub fn host_address(&self) -> Option<&str> {
        self.host_address.as_deref()
    }
    pub fn membership(&self) -> MembershipMode {
        self.membership
    }
    pub fn default_config_file(&self) -> &str {
        &self.default_config_file
    }
    pub fn paths(&self) -> &PathRoots {
        &self.paths
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// replace the configured collection (cli/env override)
    pub fn with_collection(mut self, collection: impl Into<String>) -> Result<Self> {
        let collection = collection.into();
        validate_segment("collection", &collection)?;
        self.collection = collection;
        Ok(self)
    }

    /// replace the configured host address (cli/env override)
    pub fn with_host_address(mut self, address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        validate_segment("host_address", &address)?;
        self.host_address = Some(address);
        Ok(self)
    }
}

impl TryFrom<wire::Config> for CoordinatorConfig {
    type Error = anyhow::Error;

    fn try_from(cfg: wire::Config) -> Result<Self> {
        let wire::Config {
            coordination,
            collection,
            host_address,
            membership,
            default_config_file,
            paths,
        } = cfg;

        if coordination.connect_string.trim().is_empty() {
            bail!("coordination.connect_string is empty");
        }
        if coordination.bucket.trim().is_empty() {
            bail!("coordination.bucket is empty");
        }
        validate_segment("collection", &collection)?;
        if let Some(address) = &host_address {
            validate_segment("host_address", address)?;
        }
        validate_segment("default_config_file", &default_config_file)?;
        validate_roots(&paths)?;

        Ok(Self {
            coordination: CoordinationConfig {
                connect_string: coordination.connect_string.trim().to_owned(),
                bucket: coordination.bucket,
                client_timeout: coordination.client_timeout,
                connect_wait: coordination.connect_wait,
                request_timeout: coordination.request_timeout,
            },
            collection,
            host_address,
            membership,
            default_config_file,
            paths,
            path: None,
        })
    }
}

/// a value that becomes exactly one path segment
fn validate_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        bail!("{field} is empty");
    }
    if value.contains('/') {
        bail!("{field} '{value}' must not contain '/'");
    }
    if value == "." || value == ".." {
        bail!("{field} '{value}' is not a valid path segment");
    }
    Ok(())
}

fn validate_roots(paths: &PathRoots) -> Result<()> {
    let roots = [
        ("paths.hosts", &paths.hosts),
        ("paths.collections", &paths.collections),
        ("paths.configs", &paths.configs),
    ];
    for (field, root) in roots {
        if !root.starts_with('/') || root.len() < 2 {
            bail!("{field} '{root}' must be an absolute, non-root path");
        }
        if root.ends_with('/') || root.contains("//") {
            bail!("{field} '{root}' has empty path segments");
        }
    }
    if paths.hosts == paths.collections
        || paths.hosts == paths.configs
        || paths.collections == paths.configs
    {
        bail!("paths.hosts, paths.collections and paths.configs must be distinct");
    }
    Ok(())
}
