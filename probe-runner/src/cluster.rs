//! Cluster lifecycle.
//!
//! The cluster binary is a black box driven through its command line:
//! `install`, `installfile <name>`, `start`, `stop`, `save` and a cleanup
//! command. Each is run as a child process with stdout suppressed and a
//! bounded wait.
//!
//! Commands run in the offset's control directory (host 0's instance
//! directory), which also holds the host table, so runs with distinct
//! offsets never touch each other's files. `install` runs the checkout's
//! binary there to populate the instance directories.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use probe_core::Topology;
use thiserror::Error;

/// Host table file name inside the control directory.
pub const HOST_TABLE_FILE: &str = "hosts.conf";

/// Stands for the checkout directory in cleanup command arguments.
pub const CHECKOUT_TOKEN: &str = "{PATH}";

/// Errors from lifecycle commands.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The command could not be spawned.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// Command line.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The command did not finish in time.
    #[error("{command} did not finish within {timeout:?}")]
    Timeout {
        /// Command line.
        command: String,
        /// Bound that was exceeded.
        timeout: Duration,
    },

    /// The command exited unsuccessfully.
    #[error("{command} failed: exit={exit_code}")]
    CommandFailed {
        /// Command line.
        command: String,
        /// Exit code, -1 when killed by a signal.
        exit_code: i32,
    },

    /// Writing the host table failed.
    #[error("failed to write host table {path}: {source}")]
    HostTable {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Process lifecycle of the cluster under test.
#[async_trait]
pub trait ClusterControl: Send + Sync {
    /// Wipe data left by a previous test case.
    async fn clean(&self) -> Result<(), ClusterError>;

    /// Start every instance.
    async fn start(&self) -> Result<(), ClusterError>;

    /// Stop every instance. A stop that does not finish in time counts as stopped.
    async fn stop(&self) -> Result<(), ClusterError>;

    /// Flush in-memory state to disk.
    async fn save(&self) -> Result<(), ClusterError>;

    /// Install the binary into every instance directory.
    async fn install(&self) -> Result<(), ClusterError>;

    /// Install one file into every instance directory.
    async fn install_file(&self, name: &str) -> Result<(), ClusterError>;
}

/// Write the topology's host table into `dir`, creating it if needed.
pub async fn write_host_table(dir: &Path, topology: &Topology) -> Result<PathBuf, ClusterError> {
    let path = dir.join(HOST_TABLE_FILE);
    let host_table_error = |source| ClusterError::HostTable {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(host_table_error)?;
    tokio::fs::write(&path, topology.host_table())
        .await
        .map_err(host_table_error)?;
    tracing::info!(path = %path.display(), instances = topology.instances().len(), "host table written");
    Ok(path)
}

/// The real cluster, driven through its binary.
#[derive(Debug, Clone)]
pub struct GbCluster {
    workdir: PathBuf,
    checkout: PathBuf,
    binary: String,
    clean_command: Vec<String>,
    command_timeout: Duration,
    stop_timeout: Duration,
}

impl GbCluster {
    /// A cluster controlled from `workdir`, with its binary installed there.
    pub fn new(workdir: impl Into<PathBuf>, binary: impl Into<String>) -> Self {
        let workdir = workdir.into();
        Self {
            checkout: workdir.clone(),
            workdir,
            binary: binary.into(),
            clean_command: vec!["make".to_string(), "cleantest".to_string()],
            command_timeout: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Install from the binary built in `checkout`.
    pub fn with_checkout(mut self, checkout: impl Into<PathBuf>) -> Self {
        self.checkout = checkout.into();
        self
    }

    /// Use a different cleanup command.
    pub fn with_clean_command(mut self, command: Vec<String>) -> Self {
        self.clean_command = command;
        self
    }

    /// Set the bounds for ordinary commands and for `stop`.
    pub fn with_timeouts(mut self, command: Duration, stop: Duration) -> Self {
        self.command_timeout = command;
        self.stop_timeout = stop;
        self
    }

    /// Directory commands run in.
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Directory holding the built binary.
    pub fn checkout(&self) -> &Path {
        &self.checkout
    }

    /// The checkout's binary. A bare program name is looked up on `PATH`.
    fn checkout_binary(&self) -> PathBuf {
        if self.binary.contains('/') {
            self.checkout.join(&self.binary)
        } else {
            PathBuf::from(&self.binary)
        }
    }

    async fn run(&self, program: impl AsRef<OsStr>, args: &[&str], timeout: Duration) -> Result<(), ClusterError> {
        let program = program.as_ref();
        let command = std::iter::once(program.to_string_lossy())
            .chain(args.iter().map(|a| (*a).into()))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(%command, workdir = %self.workdir.display(), "running cluster command");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClusterError::Spawn {
                command: command.clone(),
                source,
            })?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map_err(|source| ClusterError::Spawn {
                command: command.clone(),
                source,
            })?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ClusterError::Timeout { command, timeout });
            }
        };

        if !status.success() {
            return Err(ClusterError::CommandFailed {
                command,
                exit_code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    async fn run_binary(&self, args: &[&str], timeout: Duration) -> Result<(), ClusterError> {
        self.run(&self.binary, args, timeout).await
    }
}

#[async_trait]
impl ClusterControl for GbCluster {
    async fn clean(&self) -> Result<(), ClusterError> {
        tracing::info!("cleaning old cluster data");
        let Some((program, args)) = self.clean_command.split_first() else {
            return Ok(());
        };
        let checkout = self.checkout.display().to_string();
        let args: Vec<String> = args.iter().map(|a| a.replace(CHECKOUT_TOKEN, &checkout)).collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(program, &args, self.command_timeout).await
    }

    async fn start(&self) -> Result<(), ClusterError> {
        tracing::info!("starting cluster");
        self.run_binary(&["start"], self.command_timeout).await
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        tracing::info!("stopping cluster");
        match self.run_binary(&["stop"], self.stop_timeout).await {
            Err(ClusterError::Timeout { timeout, .. }) => {
                tracing::info!(?timeout, "stop did not return in time; treating cluster as stopped");
                Ok(())
            }
            other => other,
        }
    }

    async fn save(&self) -> Result<(), ClusterError> {
        tracing::info!("saving cluster");
        self.run_binary(&["save"], self.command_timeout).await
    }

    async fn install(&self) -> Result<(), ClusterError> {
        tracing::info!(checkout = %self.checkout.display(), "installing cluster");
        self.run(self.checkout_binary(), &["install"], self.command_timeout)
            .await
    }

    async fn install_file(&self, name: &str) -> Result<(), ClusterError> {
        tracing::info!(file = name, "installing file into cluster");
        self.run_binary(&["installfile", name], self.command_timeout).await
    }
}

/// Mock cluster for testing.
///
/// Records every lifecycle call; `start` can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct MockCluster {
    calls: Arc<Mutex<Vec<String>>>,
    fail_start: Arc<Mutex<bool>>,
}

impl MockCluster {
    /// Create a new mock cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail while set.
    pub fn set_fail_start(&self, fail: bool) {
        *self.fail_start.lock().unwrap() = fail;
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl ClusterControl for MockCluster {
    async fn clean(&self) -> Result<(), ClusterError> {
        self.record("clean");
        Ok(())
    }

    async fn start(&self) -> Result<(), ClusterError> {
        self.record("start");
        if *self.fail_start.lock().unwrap() {
            return Err(ClusterError::CommandFailed {
                command: "gb start".into(),
                exit_code: 1,
            });
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ClusterError> {
        self.record("stop");
        Ok(())
    }

    async fn save(&self) -> Result<(), ClusterError> {
        self.record("save");
        Ok(())
    }

    async fn install(&self) -> Result<(), ClusterError> {
        self.record("install");
        Ok(())
    }

    async fn install_file(&self, name: &str) -> Result<(), ClusterError> {
        self.record(&format!("installfile {name}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_core::TopologyParams;

    #[tokio::test]
    async fn writes_host_table() {
        let dir = tempfile::tempdir().unwrap();
        let topology = Topology::compute(&TopologyParams {
            base_path: PathBuf::from("/gb"),
            ..TopologyParams::default()
        })
        .unwrap();

        let path = write_host_table(&dir.path().join("instances00/000"), &topology)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("instances00/000/hosts.conf"));
        let written = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            written,
            "num-mirrors: 0\n0 26000 27000 28000 29000 127.0.0.1 127.0.0.1 \
             /gb/instances00/000 /gb/instances00/merge /gb/instances00/lock\n"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_commands_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = GbCluster::new(dir.path(), "true").with_clean_command(vec!["touch".into(), "cleaned".into()]);

        cluster.clean().await.unwrap();
        assert!(dir.path().join("cleaned").exists());
        cluster.start().await.unwrap();
    }

    #[tokio::test]
    async fn offsets_get_separate_control_directories() {
        let dir = tempfile::tempdir().unwrap();
        let params = |offset| TopologyParams {
            offset,
            base_path: dir.path().to_path_buf(),
            num_instances: 2,
            num_shards: 2,
            ..TopologyParams::default()
        };
        let first = Topology::compute(&params(0)).unwrap();
        let second = Topology::compute(&params(1)).unwrap();

        let a = write_host_table(first.control_path(), &first).await.unwrap();
        let b = write_host_table(second.control_path(), &second).await.unwrap();

        assert_ne!(a, b);
        assert!(std::fs::read_to_string(&a).unwrap().contains(" 28000 "));
        assert!(std::fs::read_to_string(&b).unwrap().contains(" 28010 "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_substitutes_checkout_and_install_uses_its_binary() {
        let checkout = tempfile::tempdir().unwrap();
        let workdir = tempfile::tempdir().unwrap();
        std::fs::write(checkout.path().join("gb"), "#!/bin/sh\ntouch installed-$1\n").unwrap();
        std::fs::set_permissions(
            checkout.path().join("gb"),
            std::os::unix::fs::PermissionsExt::from_mode(0o755),
        )
        .unwrap();

        let cluster = GbCluster::new(workdir.path(), "./gb")
            .with_checkout(checkout.path())
            .with_clean_command(vec!["cp".into(), "{PATH}/gb".into(), "copied".into()]);

        cluster.clean().await.unwrap();
        assert!(workdir.path().join("copied").exists());

        cluster.install().await.unwrap();
        assert!(workdir.path().join("installed-install").exists());
        assert!(!checkout.path().join("installed-install").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = GbCluster::new(dir.path(), "false");
        assert!(matches!(
            cluster.save().await,
            Err(ClusterError::CommandFailed { exit_code: 1, .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_stop_counts_as_stopped() {
        let dir = tempfile::tempdir().unwrap();
        // `sh stop` runs the script named `stop` in the workdir.
        std::fs::write(dir.path().join("stop"), "sleep 5\n").unwrap();
        let cluster = GbCluster::new(dir.path(), "sh")
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(200));

        cluster.stop().await.unwrap();

        let hanging = cluster.with_clean_command(vec!["sleep".into(), "5".into()]);
        assert!(matches!(hanging.clean().await, Err(ClusterError::Timeout { .. })));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = GbCluster::new(dir.path(), "./definitely-not-here");
        assert!(matches!(cluster.start().await, Err(ClusterError::Spawn { .. })));
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let cluster = MockCluster::new();
        cluster.clean().await.unwrap();
        cluster.install_file("robots.txt").await.unwrap();
        cluster.set_fail_start(true);
        assert!(cluster.start().await.is_err());
        assert_eq!(cluster.calls(), vec!["clean", "installfile robots.txt", "start"]);
    }
}
