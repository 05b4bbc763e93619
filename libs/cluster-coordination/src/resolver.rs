//! Collection to bundle resolution.
//!
//! A collection names its bundle through a child node `config=<bundle>`.
//! Exactly one such child must exist; zero or several are rejected, so the
//! result never depends on the order in which the service lists children.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CoordinationError, CoordinationResult};
use crate::models::{BundleName, CollectionName};
use crate::paths::{PathLayout, bundle_marker};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct ConfigResolver {
    session: Arc<Session>,
    layout: PathLayout,
}

impl ConfigResolver {
    pub fn new(session: Arc<Session>, layout: PathLayout) -> Self {
        Self { session, layout }
    }

    /// Resolve the bundle `collection` uses.
    pub async fn resolve(&self, collection: &CollectionName) -> CoordinationResult<BundleName> {
        let path = self.layout.collection(collection);
        debug!(%collection, path, "looking up collection config");

        let children = match self.session.children(&path).await {
            Ok(children) => children,
            Err(CoordinationError::NotFound(_)) => {
                return Err(CoordinationError::CollectionNotFound {
                    collection: collection.to_string(),
                    path,
                });
            }
            Err(e) => return Err(e),
        };

        select_bundle(collection, &children)
            .inspect(|bundle| info!(%collection, %bundle, "resolved collection config bundle"))
    }
}

/// Pick the single bundle named among `children`.
pub fn select_bundle(
    collection: &CollectionName,
    children: &[String],
) -> CoordinationResult<BundleName> {
    let mut candidates = Vec::new();
    for child in children {
        debug!(%collection, child, "checking collection child");
        let Some(bundle) = bundle_marker(child) else {
            continue;
        };
        match BundleName::new(bundle) {
            Ok(bundle) => candidates.push(bundle),
            Err(e) => warn!(%collection, child, error = %e, "ignoring malformed bundle marker"),
        }
    }
    candidates.sort();

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        _ => Err(CoordinationError::AmbiguousOrMissingBundle {
            collection: collection.to_string(),
            candidates: candidates.iter().map(ToString::to_string).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::memory::{MemoryConnector, MemoryEnsemble};
    use crate::models::ClusterEndpoint;

    fn films() -> CollectionName {
        CollectionName::new("films").unwrap()
    }

    fn names(children: &[&str]) -> Vec<String> {
        children.iter().map(|c| c.to_string()).collect()
    }

    async fn resolver(ensemble: &MemoryEnsemble) -> ConfigResolver {
        let session = Session::open(
            ClusterEndpoint::new("memory://test", Duration::from_secs(10)),
            &MemoryConnector::new(ensemble.clone()),
        )
        .await
        .unwrap();
        ConfigResolver::new(Arc::new(session), PathLayout::with_defaults())
    }

    #[test]
    fn test_single_marker() {
        let bundle =
            select_bundle(&films(), &names(&["shards", "config=filmsBundle", "leader"])).unwrap();
        assert_eq!(bundle.as_str(), "filmsBundle");
    }

    #[test]
    fn test_suffix_after_first_equals() {
        let bundle = select_bundle(&films(), &names(&["config=a=b"])).unwrap();
        assert_eq!(bundle.as_str(), "a=b");
    }

    #[test]
    fn test_no_marker() {
        let err = select_bundle(&films(), &names(&["shards", "configuration"])).unwrap_err();
        match err {
            CoordinationError::AmbiguousOrMissingBundle {
                collection,
                candidates,
            } => {
                assert_eq!(collection, "films");
                assert!(candidates.is_empty());
            }
            other => panic!("expected AmbiguousOrMissingBundle, got: {other:?}"),
        }
    }

    #[test]
    fn test_empty_marker_ignored() {
        assert!(select_bundle(&films(), &names(&["config="])).is_err());
        let bundle = select_bundle(&films(), &names(&["config=", "config=x"])).unwrap();
        assert_eq!(bundle.as_str(), "x");
    }

    #[test]
    fn test_several_markers_rejected_in_any_order() {
        for children in [
            names(&["config=b", "config=a"]),
            names(&["config=a", "config=b"]),
        ] {
            let err = select_bundle(&films(), &children).unwrap_err();
            match err {
                CoordinationError::AmbiguousOrMissingBundle { candidates, .. } => {
                    assert_eq!(candidates, vec!["a", "b"]);
                }
                other => panic!("expected AmbiguousOrMissingBundle, got: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_resolve_from_tree() {
        let ensemble = MemoryEnsemble::new();
        ensemble
            .put("/collections/films/config=filmsBundle", "")
            .unwrap();
        let resolver = resolver(&ensemble).await;
        assert_eq!(
            resolver.resolve(&films()).await.unwrap().as_str(),
            "filmsBundle"
        );
    }

    #[tokio::test]
    async fn test_resolve_missing_collection() {
        let resolver = resolver(&MemoryEnsemble::new()).await;
        let err = resolver.resolve(&films()).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::CollectionNotFound { ref path, .. } if path == "/collections/films"
        ));
        assert!(err.is_fatal_startup());
    }

    #[tokio::test]
    async fn test_resolve_service_fault() {
        let ensemble = MemoryEnsemble::new();
        let resolver = resolver(&ensemble).await;
        ensemble.set_faulty(true);
        assert!(matches!(
            resolver.resolve(&films()).await.unwrap_err(),
            CoordinationError::Coordination { .. }
        ));
    }
}
