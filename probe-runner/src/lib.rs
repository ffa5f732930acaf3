//! # crawlprobe
//!
//! End-to-end test harness for a distributed crawl/index/search cluster.
//!
//! A run starts a fixture web server over a tree of test cases, then for each
//! case starts the cluster, seeds it with fixture URLs, waits for spidering
//! to drain and checks what was crawled, indexed and searchable. Every
//! checked step becomes one record in a JSON report.
//!
//! ## Modules
//!
//! - [`config`] - TOML configuration with defaults for every field
//! - [`cluster`] - the cluster lifecycle behind [`ClusterControl`]
//! - [`testcase`] - test case discovery and loading
//! - [`engine`] - per-case execution: start-up, instructions, completion polling
//! - [`actions`] - the instruction action table, operations and assertions
//! - [`suite`] - the whole run: topology, fixture server, cases, report
//!
//! ## Example
//!
//! ```ignore
//! use crawlprobe::{suite, Config};
//!
//! let config = Config::load(None)?;
//! let summary = suite::run(&config, Some("case1")).await?;
//! assert!(summary.passed());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actions;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod suite;
pub mod testcase;

pub use actions::Action;
pub use cluster::{ClusterControl, ClusterError, GbCluster, MockCluster};
pub use config::{Config, ConfigError};
pub use engine::{Engine, EngineSettings, Shard};
pub use suite::SuiteError;
pub use testcase::TestCase;
