//! Suite runner: everything around the per-case engine.
//!
//! Computes the topology, writes the host table into the offset's control
//! directory, optionally installs the binary, serves the fixture tree, runs
//! every selected test case in natural order and writes the aggregated
//! report.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use probe_client::{ApiClient, HttpTransport, Transport, TransportError};
use probe_core::{RegistryError, ReportSink, Summary, Topology, TopologyError};
use probe_fixture::{FixtureError, FixtureServer, ServedUrlLog};
use thiserror::Error;

use crate::cluster::{write_host_table, ClusterControl, ClusterError, GbCluster};
use crate::config::{Config, ConfigError};
use crate::engine::{Engine, EngineSettings, Shard};
use crate::testcase::{discover, TestCase};

/// Per-request timeout of admin clients.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that abort a whole run. Step failures never do.
#[derive(Debug, Error)]
pub enum SuiteError {
    /// Ports derived from the configuration are out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid topology.
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Host table, install or stop failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The fixture server could not start.
    #[error(transparent)]
    Fixture(#[from] FixtureError),

    /// An admin client could not be built.
    #[error("failed to build admin client: {0}")]
    Transport(#[from] TransportError),

    /// The action table is malformed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// No test case with the selected name.
    #[error("no test case named {name} in {dir}")]
    UnknownCase {
        /// Selected name.
        name: String,
        /// Test directory searched.
        dir: PathBuf,
    },

    /// Reading the test directory failed.
    #[error("failed to read test directory {dir}: {source}")]
    TestDir {
        /// Test directory.
        dir: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The report could not be written.
    #[error("failed to write report {path}: {source}")]
    Report {
        /// Report path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The report could not be serialized.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Names of the cases to run: all of them, or the one selected.
pub async fn select_cases(test_dir: &Path, selected: Option<&str>) -> Result<Vec<String>, SuiteError> {
    let names = discover(test_dir).await.map_err(|source| SuiteError::TestDir {
        dir: test_dir.to_path_buf(),
        source,
    })?;

    match selected {
        None => Ok(names),
        Some(name) if names.iter().any(|n| n == name) => Ok(vec![name.to_string()]),
        Some(name) => Err(SuiteError::UnknownCase {
            name: name.to_string(),
            dir: test_dir.to_path_buf(),
        }),
    }
}

/// Run the named cases one after another, adding one suite each to `report`.
///
/// The served-URL log is cleared before each case so that seeding starts
/// from an empty log.
pub async fn run_cases<T: Transport, C: ClusterControl>(
    engine: &mut Engine<T, C>,
    test_dir: &Path,
    names: &[String],
    report: &mut ReportSink,
) -> Result<(), SuiteError> {
    for name in names {
        let case = TestCase::load(test_dir, name)
            .await
            .map_err(|source| SuiteError::TestDir {
                dir: test_dir.join(name),
                source,
            })?;

        engine.served().clear();
        let suite = engine.run_case(&case).await;
        report.add_suite(&suite.name, &suite.description, suite.records);
    }
    Ok(())
}

/// Write the report as pretty JSON.
pub async fn write_report(report: &ReportSink, path: &Path) -> Result<(), SuiteError> {
    let json = report.to_json()?;
    tokio::fs::write(path, json).await.map_err(|source| SuiteError::Report {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}

/// The cluster as configured, controlled from the topology's control
/// directory and installed from the configured checkout.
pub fn cluster_for(config: &Config, topology: &Topology) -> GbCluster {
    GbCluster::new(topology.control_path(), &config.cluster.binary)
        .with_checkout(&config.cluster.path)
        .with_clean_command(config.cluster.clean_command.clone())
        .with_timeouts(config.timeouts.command(), config.timeouts.stop())
}

fn client(host: &str, port: u16) -> Result<ApiClient<HttpTransport>, TransportError> {
    Ok(ApiClient::new(HttpTransport::with_timeout(host, port, CLIENT_TIMEOUT)?))
}

/// Run a whole suite against the real cluster.
pub async fn run(config: &Config, selected: Option<&str>) -> Result<Summary, SuiteError> {
    let port_stride = config.port_stride();
    let topology = Topology::compute(&config.topology_params_with_stride(port_stride))?;
    write_host_table(topology.control_path(), &topology).await?;

    let cluster = cluster_for(config, &topology);
    if config.cluster.install {
        cluster.install().await?;
    }

    let host = config.cluster.host.as_str();
    let shards = topology
        .shard_instances()
        .iter()
        .map(|instance| Ok(Shard::new(instance.host_id, client(host, instance.port())?)))
        .collect::<Result<Vec<_>, TransportError>>()?;
    let query = client(host, topology.query_instance().port())?;

    let names = select_cases(&config.run.test_dir, selected).await?;
    tracing::info!(cases = names.len(), shards = shards.len(), "starting run");

    let settings = EngineSettings::from_config(config, port_stride)?;
    let served = ServedUrlLog::new();
    let fixture = FixtureServer::start(config.fixture_settings(port_stride)?, served.clone()).await?;

    let mut engine = Engine::new(cluster, shards, query, served, settings)?;
    let mut report = ReportSink::new();
    let outcome = run_cases(&mut engine, &config.run.test_dir, &names, &mut report).await;
    fixture.stop().await;
    outcome?;

    write_report(&report, &config.run.report).await?;

    let summary = report.summary();
    tracing::info!(
        suites = summary.suites,
        tests = summary.tests,
        failures = summary.failures,
        "run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn selects_all_or_one_case() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("case10")).unwrap();
        fs::create_dir_all(dir.path().join("case2")).unwrap();

        assert_eq!(select_cases(dir.path(), None).await.unwrap(), vec!["case2", "case10"]);
        assert_eq!(select_cases(dir.path(), Some("case10")).await.unwrap(), vec!["case10"]);
        assert!(matches!(
            select_cases(dir.path(), Some("case3")).await,
            Err(SuiteError::UnknownCase { .. })
        ));
    }

    #[tokio::test]
    async fn missing_test_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = select_cases(&dir.path().join("absent"), None).await;
        assert!(matches!(result, Err(SuiteError::TestDir { .. })));
    }

    #[test]
    fn offsets_control_separate_directories() {
        let mut config = Config::default();
        config.cluster.path = PathBuf::from("/srv/gb");
        config.cluster.num_instances = 2;
        config.cluster.num_shards = 2;

        let at = |offset| {
            let mut config = config.clone();
            config.cluster.offset = offset;
            let topology = Topology::compute(&config.topology_params_with_stride(10)).unwrap();
            cluster_for(&config, &topology)
        };
        let first = at(0);
        let second = at(1);

        assert_eq!(first.workdir(), Path::new("/srv/gb/instances00/000"));
        assert_eq!(second.workdir(), Path::new("/srv/gb/instances01/000"));
        assert_eq!(first.checkout(), Path::new("/srv/gb"));
        assert_eq!(second.checkout(), Path::new("/srv/gb"));
    }

    #[tokio::test]
    async fn report_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.json");
        let mut report = ReportSink::new();
        report.add_suite("case1", "Basic crawl", Vec::new());

        write_report(&report, &path).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["suites"][0]["name"], "case1");
    }
}
