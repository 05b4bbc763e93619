use std::time::Duration;

use anyhow::Result;
use cluster_coordination::{
    BoxError, ClusterCoordinator, ClusterEndpoint, CollectionName, ConfigParser,
    CoordinationError, CoordinatorOptions, HostAddress, MembershipMode, MemoryConnector,
    MemoryEnsemble, SchemaParser, SessionState,
};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

/// Runtime config as a flat list of `key=value` lines.
#[derive(Debug, PartialEq, Eq)]
struct RuntimeConfig {
    name: String,
    entries: Vec<(String, String)>,
}

struct LineParser;

impl ConfigParser for LineParser {
    type Config = RuntimeConfig;
    type Loader = str;

    fn parse_config(
        &self,
        loader: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<RuntimeConfig, BoxError> {
        let text = std::str::from_utf8(bytes)?;
        let entries = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.split_once('=')
                    .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
                    .ok_or_else(|| BoxError::from(format!("{loader}: bad line {l:?}")))
            })
            .collect::<Result<_, _>>()?;
        Ok(RuntimeConfig {
            name: file_name.to_owned(),
            entries,
        })
    }
}

#[derive(Debug)]
struct Schema {
    config_name: String,
    body: String,
}

struct RawSchemaParser;

impl SchemaParser for RawSchemaParser {
    type Schema = Schema;
    type Config = RuntimeConfig;
    type Loader = str;

    fn parse_schema(
        &self,
        config: &RuntimeConfig,
        _loader: &str,
        _file_name: &str,
        bytes: &[u8],
    ) -> Result<Schema, BoxError> {
        let body = std::str::from_utf8(bytes)?.to_owned();
        if !body.starts_with('<') {
            return Err("schema must be markup".into());
        }
        Ok(Schema {
            config_name: config.name.clone(),
            body,
        })
    }
}

fn films_tree() -> Result<MemoryEnsemble> {
    let ensemble = MemoryEnsemble::new();
    ensemble.put("/collections/films/config=filmsBundle", "")?;
    ensemble.put("/collections/films/shards", "")?;
    ensemble.put("/configs/filmsBundle/schema.xml", "<schema/>")?;
    ensemble.put("/configs/filmsBundle/config.xml", "cache=on\nrows=10\n")?;
    ensemble.put("/configs/filmsBundle/tuning.txt", "rows=50\n")?;
    Ok(ensemble)
}

fn options(collection: &str) -> Result<CoordinatorOptions> {
    Ok(CoordinatorOptions::new(
        ClusterEndpoint::new("memory://films", Duration::from_secs(10))
            .with_host_address(HostAddress::new("10.0.0.7:8983")?),
        CollectionName::new(collection)?,
    ))
}

#[tokio::test]
#[traced_test]
async fn test_films_bundle_end_to_end() -> Result<()> {
    let ensemble = films_tree()?;
    let coordinator =
        ClusterCoordinator::open(options("films")?, &MemoryConnector::new(ensemble.clone())).await?;

    assert_eq!(coordinator.bundle_name().as_str(), "filmsBundle");
    assert_eq!(coordinator.address().as_str(), "10.0.0.7:8983");
    assert!(ensemble.contains("/hosts/10.0.0.7:8983"));

    let bundle_path = coordinator.bundle_path();
    assert_eq!(
        &coordinator.get_file(&bundle_path, "schema.xml").await?[..],
        b"<schema/>"
    );
    assert!(coordinator.exists("/configs/filmsBundle/schema.xml").await?);
    assert!(!coordinator.exists("/configs/filmsBundle/missing.xml").await?);

    let err = coordinator
        .get_file(&bundle_path, "missing.xml")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    coordinator.close().await?;
    assert_eq!(coordinator.session().state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_config_and_schema_through_parsers() -> Result<()> {
    let coordinator =
        ClusterCoordinator::open(options("films")?, &MemoryConnector::new(films_tree()?)).await?;

    let config = coordinator.get_config(&LineParser, None, "films").await?;
    assert_eq!(config.name, "config.xml");
    assert_eq!(
        config.entries,
        vec![
            ("cache".to_owned(), "on".to_owned()),
            ("rows".to_owned(), "10".to_owned())
        ]
    );

    let tuning = coordinator
        .get_config(&LineParser, Some("tuning.txt"), "films")
        .await?;
    assert_eq!(tuning.entries, vec![("rows".to_owned(), "50".to_owned())]);

    let schema = coordinator
        .get_schema(&RawSchemaParser, "schema.xml", &config, "films")
        .await?;
    assert_eq!(schema.body, "<schema/>");
    assert_eq!(schema.config_name, "config.xml");

    coordinator.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_parser_failure_names_file() -> Result<()> {
    let ensemble = films_tree()?;
    ensemble.put("/configs/filmsBundle/broken.txt", "no separator here")?;
    let coordinator =
        ClusterCoordinator::open(options("films")?, &MemoryConnector::new(ensemble)).await?;

    let err = coordinator
        .get_config(&LineParser, Some("broken.txt"), "films")
        .await
        .unwrap_err();
    match &err {
        CoordinationError::Parse { file, .. } => assert_eq!(file, "broken.txt"),
        other => panic!("expected Parse, got: {other:?}"),
    }
    assert!(std::error::Error::source(&err).is_some());

    let config = coordinator.get_config(&LineParser, None, "films").await?;
    let err = coordinator
        .get_schema(&RawSchemaParser, "tuning.txt", &config, "films")
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinationError::Parse { ref file, .. } if file == "tuning.txt"));

    coordinator.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_edits_visible_without_reopen() -> Result<()> {
    let ensemble = films_tree()?;
    let coordinator =
        ClusterCoordinator::open(options("films")?, &MemoryConnector::new(ensemble.clone())).await?;
    let bundle_path = coordinator.bundle_path();

    ensemble.put("/configs/filmsBundle/schema.xml", "<schema name=\"v2\"/>")?;
    assert_eq!(
        &coordinator.get_file(&bundle_path, "schema.xml").await?[..],
        b"<schema name=\"v2\"/>"
    );

    // the bundle itself is fixed at open
    ensemble.put("/collections/films/config=otherBundle", "")?;
    assert_eq!(coordinator.bundle_name().as_str(), "filmsBundle");

    coordinator.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_two_coordinators_share_membership_root() -> Result<()> {
    let ensemble = films_tree()?;
    let connector = MemoryConnector::new(ensemble.clone());

    let first = ClusterCoordinator::open(options("films")?, &connector).await?;
    let second = ClusterCoordinator::open(
        CoordinatorOptions::new(
            ClusterEndpoint::new("memory://films", Duration::from_secs(10))
                .with_host_address(HostAddress::new("10.0.0.8:8983")?),
            CollectionName::new("films")?,
        ),
        &connector,
    )
    .await?;
    // same address again is tolerated
    let again = ClusterCoordinator::open(options("films")?, &connector).await?;

    assert_eq!(
        ensemble.paths_under("/hosts"),
        vec!["/hosts", "/hosts/10.0.0.7:8983", "/hosts/10.0.0.8:8983"]
    );

    for coordinator in [first, second, again] {
        coordinator.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_ephemeral_membership_removed_on_close() -> Result<()> {
    let ensemble = films_tree()?;
    let coordinator = ClusterCoordinator::open(
        options("films")?.with_membership(MembershipMode::Ephemeral),
        &MemoryConnector::new(ensemble.clone()),
    )
    .await?;
    assert!(ensemble.contains("/hosts/10.0.0.7:8983"));

    coordinator.close().await?;
    coordinator.close().await?;
    assert!(!ensemble.contains("/hosts/10.0.0.7:8983"));
    assert!(ensemble.contains("/hosts"));
    Ok(())
}

#[tokio::test]
async fn test_unknown_collection_is_fatal() -> Result<()> {
    let err = ClusterCoordinator::open(options("books")?, &MemoryConnector::new(films_tree()?))
        .await
        .unwrap_err();
    assert!(err.is_fatal_startup());
    assert!(matches!(err, CoordinationError::CollectionNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_ambiguous_bundle_is_fatal() -> Result<()> {
    let ensemble = films_tree()?;
    ensemble.put("/collections/films/config=archiveBundle", "")?;
    let err = ClusterCoordinator::open(options("films")?, &MemoryConnector::new(ensemble))
        .await
        .unwrap_err();
    match err {
        CoordinationError::AmbiguousOrMissingBundle { candidates, .. } => {
            assert_eq!(candidates, vec!["archiveBundle", "filmsBundle"]);
        }
        other => panic!("expected AmbiguousOrMissingBundle, got: {other:?}"),
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_ensemble_times_out() -> Result<()> {
    let started = tokio::time::Instant::now();
    let err = ClusterCoordinator::open(
        options("films")?,
        &MemoryConnector::new(films_tree()?).unreachable(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CoordinationError::ConnectTimeout { .. }));
    assert!(err.is_fatal_startup());
    assert!(started.elapsed() >= Duration::from_millis(5000));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_aborts_in_flight_read() -> Result<()> {
    let ensemble = films_tree()?;
    let token = CancellationToken::new();
    let coordinator = ClusterCoordinator::open_with_interrupt(
        options("films")?,
        &MemoryConnector::new(ensemble.clone()),
        token.clone(),
    )
    .await?;
    let bundle_path = coordinator.bundle_path();

    ensemble.set_stalled(true);
    let read = coordinator.get_file(&bundle_path, "schema.xml");
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(read, cancel);
    assert!(result.unwrap_err().is_interrupted());

    // later calls are refused too
    ensemble.set_stalled(false);
    assert!(
        coordinator
            .exists("/configs")
            .await
            .unwrap_err()
            .is_interrupted()
    );
    coordinator.close().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stalled_read_hits_deadline() -> Result<()> {
    let ensemble = films_tree()?;
    let coordinator =
        ClusterCoordinator::open(options("films")?, &MemoryConnector::new(ensemble.clone())).await?;

    ensemble.set_stalled(true);
    let err = coordinator
        .get_file(&coordinator.bundle_path(), "schema.xml")
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    ensemble.set_stalled(false);
    assert!(coordinator.exists("/configs").await?);
    coordinator.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_nested_bundle_file() -> Result<()> {
    let ensemble = films_tree()?;
    ensemble.put("/configs/filmsBundle/lang/stopwords.txt", "a\nthe\n")?;
    let coordinator =
        ClusterCoordinator::open(options("films")?, &MemoryConnector::new(ensemble)).await?;

    assert_eq!(
        &coordinator
            .get_file(&coordinator.bundle_path(), "lang/stopwords.txt")
            .await?[..],
        b"a\nthe\n"
    );
    let tokens = coordinator
        .get_config(&LineParser, Some("lang/stopwords.txt"), "films")
        .await
        .unwrap_err();
    assert!(matches!(tokens, CoordinationError::Parse { ref file, .. } if file == "lang/stopwords.txt"));

    coordinator.close().await?;
    Ok(())
}
