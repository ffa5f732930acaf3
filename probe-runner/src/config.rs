//! Configuration loading for crawlprobe.
//!
//! Configuration is loaded from a TOML file (default: `crawlprobe.toml`).
//! Every field has a default, so partial files and a missing default file
//! both work.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use probe_core::{Placeholders, PollerConfig, TopologyParams, CI_PORT_STRIDE, DEFAULT_PORT_STRIDE};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "crawlprobe.toml";

/// Environment variable set by parallel CI executors.
pub const EXECUTOR_ENV: &str = "EXECUTOR_NUMBER";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Cluster under test.
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Fixture web server.
    #[serde(default)]
    pub fixture: FixtureConfig,
    /// Run settings.
    #[serde(default)]
    pub run: RunConfig,
    /// Timeouts and poll timing.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Cluster under test.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Directory containing the cluster binary (default: ../open-source-search-engine).
    #[serde(default = "default_cluster_path")]
    pub path: PathBuf,
    /// Admin API host (default: 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,
    /// Base HTTP port (default: 28000).
    #[serde(default = "default_cluster_port")]
    pub port: u16,
    /// Run offset for side-by-side harness runs (default: 0).
    #[serde(default)]
    pub offset: u32,
    /// Instance count (default: 1).
    #[serde(default = "default_one")]
    pub num_instances: u32,
    /// Shard count (default: 1).
    #[serde(default = "default_one")]
    pub num_shards: u32,
    /// Cluster binary, relative to `path` (default: ./gb).
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Command that wipes old cluster data, run in the offset's control
    /// directory; `{PATH}` in an argument stands for `path`
    /// (default: make -f {PATH}/Makefile cleantest).
    #[serde(default = "default_clean_command")]
    pub clean_command: Vec<String>,
    /// Run `install` before the first test case (default: true).
    #[serde(default = "default_true")]
    pub install: bool,
}

/// Fixture web server.
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureConfig {
    /// Scheme of seeded URLs (default: http).
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Domain under which test cases are served (default: privacore.test).
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Listen port at offset 0 (default: 28080).
    #[serde(default = "default_fixture_port")]
    pub port: u16,
    /// Bind address (default: 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTPS listen port at offset 0 (default: 4443).
    #[serde(default = "default_tls_port")]
    pub tls_port: u16,
    /// PEM certificate chain; with `key_file` enables the HTTPS listener.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    /// PEM private key of the HTTPS listener.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl FixtureConfig {
    /// Certificate and key, when both are configured.
    pub fn tls_files(&self) -> Option<(&Path, &Path)> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// Run settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Directory containing one subdirectory per test case (default: tests).
    #[serde(default = "default_test_dir")]
    pub test_dir: PathBuf,
    /// Report output path (default: output.json).
    #[serde(default = "default_report")]
    pub report: PathBuf,
}

/// Timeouts and poll timing.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Cluster start-up deadline in seconds (default: 300).
    #[serde(default = "default_deadline_secs")]
    pub startup_secs: u64,
    /// Completion polling ceiling in seconds (default: 300).
    #[serde(default = "default_deadline_secs")]
    pub spider_secs: u64,
    /// Sleep between polls in milliseconds (default: 500).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Grace for a still-initializing spider in seconds (default: 5).
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,
    /// Quiet, empty queue confirmation window in seconds (default: 2).
    #[serde(default = "default_settle_confirm_secs")]
    pub settle_confirm_secs: u64,
    /// Bound on lifecycle commands in seconds (default: 120).
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,
    /// Bound on `stop` in seconds (default: 5).
    #[serde(default = "default_stop_secs")]
    pub stop_secs: u64,
    /// Settle after document operations in milliseconds (default: 1000).
    #[serde(default = "default_doc_settle_ms")]
    pub doc_settle_ms: u64,
}

fn default_cluster_path() -> PathBuf {
    PathBuf::from("../open-source-search-engine")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_cluster_port() -> u16 {
    28000
}

fn default_one() -> u32 {
    1
}

fn default_binary() -> String {
    "./gb".to_string()
}

fn default_clean_command() -> Vec<String> {
    ["make", "-f", "{PATH}/Makefile", "cleantest"]
        .map(String::from)
        .to_vec()
}

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_domain() -> String {
    "privacore.test".to_string()
}

fn default_fixture_port() -> u16 {
    28080
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_tls_port() -> u16 {
    4443
}

fn default_test_dir() -> PathBuf {
    PathBuf::from("tests")
}

fn default_report() -> PathBuf {
    PathBuf::from("output.json")
}

fn default_deadline_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_startup_grace_secs() -> u64 {
    5
}

fn default_settle_confirm_secs() -> u64 {
    2
}

fn default_command_secs() -> u64 {
    120
}

fn default_stop_secs() -> u64 {
    5
}

fn default_doc_settle_ms() -> u64 {
    1000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            path: default_cluster_path(),
            host: default_host(),
            port: default_cluster_port(),
            offset: 0,
            num_instances: default_one(),
            num_shards: default_one(),
            binary: default_binary(),
            clean_command: default_clean_command(),
            install: default_true(),
        }
    }
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            domain: default_domain(),
            port: default_fixture_port(),
            bind: default_bind(),
            tls_port: default_tls_port(),
            cert_file: None,
            key_file: None,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_dir: default_test_dir(),
            report: default_report(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_secs: default_deadline_secs(),
            spider_secs: default_deadline_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            startup_grace_secs: default_startup_grace_secs(),
            settle_confirm_secs: default_settle_confirm_secs(),
            command_secs: default_command_secs(),
            stop_secs: default_stop_secs(),
            doc_settle_ms: default_doc_settle_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Cluster start-up deadline.
    pub fn startup(&self) -> Duration {
        Duration::from_secs(self.startup_secs)
    }

    /// Bound on lifecycle commands.
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    /// Bound on `stop`.
    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    /// Settle after document operations.
    pub fn doc_settle(&self) -> Duration {
        Duration::from_millis(self.doc_settle_ms)
    }

    /// Completion poller timing.
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            startup_grace: Duration::from_secs(self.startup_grace_secs),
            confirm_window: Duration::from_secs(self.settle_confirm_secs),
            ceiling: Duration::from_secs(self.spider_secs),
            ..PollerConfig::default()
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load an explicitly named file, or the default file if it exists.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Port stride per offset for this process.
    pub fn port_stride(&self) -> u16 {
        port_stride(std::env::var_os(EXECUTOR_ENV).is_some())
    }

    /// Topology inputs, with the port stride taken from the environment.
    pub fn topology_params(&self) -> TopologyParams {
        self.topology_params_with_stride(self.port_stride())
    }

    /// Topology inputs with an explicit port stride.
    pub fn topology_params_with_stride(&self, port_stride: u16) -> TopologyParams {
        TopologyParams {
            offset: self.cluster.offset,
            base_path: self.cluster.path.clone(),
            num_instances: self.cluster.num_instances,
            num_shards: self.cluster.num_shards,
            base_port: self.cluster.port,
            port_stride,
        }
    }

    /// Shift an offset-0 port into this run's offset band.
    pub fn offset_port(&self, port: u16, port_stride: u16) -> Result<u16, ConfigError> {
        let offset = self.cluster.offset;
        let shifted = u32::from(port).saturating_add(offset.saturating_mul(u32::from(port_stride)));
        u16::try_from(shifted).map_err(|_| ConfigError::PortOutOfRange { port, offset })
    }

    /// Fixture server settings for this run's offset.
    pub fn fixture_settings(&self, port_stride: u16) -> Result<probe_fixture::FixtureConfig, ConfigError> {
        let fixture = &self.fixture;
        let mut settings = probe_fixture::FixtureConfig::new(
            &self.run.test_dir,
            fixture.scheme.as_str(),
            self.offset_port(fixture.port, port_stride)?,
        )
        .with_bind(fixture.bind.as_str());
        if let Some((cert, key)) = fixture.tls_files() {
            settings = settings.with_tls(self.offset_port(fixture.tls_port, port_stride)?, cert, key);
        }
        Ok(settings)
    }

    /// Placeholder values for literals and seeds.
    ///
    /// With the `https` scheme and an HTTPS listener configured, `{PORT}`
    /// is the HTTPS port.
    pub fn placeholders(&self, port_stride: u16) -> Result<Placeholders, ConfigError> {
        let fixture = &self.fixture;
        let base = if fixture.scheme == "https" && fixture.tls_files().is_some() {
            fixture.tls_port
        } else {
            fixture.port
        };
        Ok(Placeholders {
            scheme: fixture.scheme.clone(),
            domain: fixture.domain.clone(),
            port: self.offset_port(base, port_stride)?,
        })
    }
}

/// Port stride per offset, widened under a parallel CI executor.
pub fn port_stride(under_executor: bool) -> u16 {
    if under_executor {
        CI_PORT_STRIDE
    } else {
        DEFAULT_PORT_STRIDE
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// An offset pushes a port past 65535.
    #[error("port {port} shifted by offset {offset} does not fit in 1..=65535")]
    PortOutOfRange {
        /// Configured offset-0 port.
        port: u16,
        /// Run offset.
        offset: u32,
    },
}
