//! Raw access to files inside configuration bundles.
//!
//! Nothing is cached: every fetch reads the service again, so a bundle edited
//! in place is seen on the next call.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use crate::error::{CoordinationError, CoordinationResult};
use crate::paths::{join, validate_path};
use crate::session::Session;

/// Reads bundle files and checks for the existence of paths.
#[derive(Debug, Clone)]
pub struct BundleFileStore {
    session: Arc<Session>,
}

impl BundleFileStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Bytes stored at `<bundle_path>/<file_name>`. `file_name` may name a
    /// nested file (`lang/stopwords.txt`). A missing file is
    /// [`CoordinationError::NotFound`], never an empty result.
    pub async fn fetch(&self, bundle_path: &str, file_name: &str) -> CoordinationResult<Bytes> {
        let path = join(bundle_path, file_name);
        validate_path(&path)?;
        info!(file = file_name, path, "reading file from coordination service");
        self.session.get_data(&path).await
    }

    /// Whether `path` exists right now. Absence is `Ok(false)`; only service
    /// failures are errors.
    pub async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        match self.session.exists(path).await {
            Err(CoordinationError::NotFound(_)) => Ok(false),
            other => other,
        }
    }
}
