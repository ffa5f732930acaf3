//! # crawlprobe
//!
//! End-to-end test harness for a distributed crawl/index/search cluster.
//!
//! ## Commands
//!
//! - `run`: run every test case, or one selected by name
//! - `stop`: stop the cluster
//! - `hosts`: print or write the host table
//! - `fixture`: serve the fixture tree until Ctrl-C
//!
//! ## Example
//!
//! ```bash
//! # Run the whole suite against a cluster checkout
//! crawlprobe --path ../open-source-search-engine run
//!
//! # Run one case on a two-shard cluster with debug logging
//! crawlprobe --num-instances 2 --num-shards 2 --verbose run case3
//!
//! # Stop a cluster left running
//! crawlprobe stop
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{fixture, hosts, run, stop};
use crawlprobe::Config;

/// End-to-end test harness for a crawl/index/search cluster.
#[derive(Parser, Debug)]
#[command(name = "crawlprobe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: crawlprobe.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the test cases
    #[arg(long, global = true)]
    testdir: Option<PathBuf>,

    /// Cluster binary directory
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Cluster host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Base HTTP port of the cluster
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Offset for running several clusters side by side
    #[arg(long, global = true)]
    offset: Option<u32>,

    /// Number of cluster instances
    #[arg(long, global = true)]
    num_instances: Option<u32>,

    /// Number of shards
    #[arg(long, global = true)]
    num_shards: Option<u32>,

    /// Scheme of fixture URLs
    #[arg(long, global = true)]
    dest_scheme: Option<String>,

    /// Domain of fixture URLs
    #[arg(long, global = true)]
    dest_domain: Option<String>,

    /// Port of the fixture server
    #[arg(long, global = true)]
    dest_port: Option<u16>,

    /// HTTPS port of the fixture server
    #[arg(long, global = true)]
    tls_port: Option<u16>,

    /// PEM certificate for the HTTPS fixture listener
    #[arg(long, global = true)]
    cert_file: Option<PathBuf>,

    /// PEM private key for the HTTPS fixture listener
    #[arg(long, global = true)]
    key_file: Option<PathBuf>,

    /// Report file
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the test suite
    Run {
        /// Run only this test case
        case: Option<String>,
    },

    /// Stop the cluster
    Stop,

    /// Render the host table for the configured topology
    Hosts {
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Serve the fixture tree until Ctrl-C
    Fixture,
}

impl Cli {
    /// Load the configuration file and apply flag overrides.
    fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref()).context("Failed to load configuration")?;

        if let Some(dir) = &self.testdir {
            config.run.test_dir = dir.clone();
        }
        if let Some(path) = &self.path {
            config.cluster.path = path.clone();
        }
        if let Some(host) = &self.host {
            config.cluster.host = host.clone();
        }
        if let Some(port) = self.port {
            config.cluster.port = port;
        }
        if let Some(offset) = self.offset {
            config.cluster.offset = offset;
        }
        if let Some(n) = self.num_instances {
            config.cluster.num_instances = n;
        }
        if let Some(n) = self.num_shards {
            config.cluster.num_shards = n;
        }
        if let Some(scheme) = &self.dest_scheme {
            config.fixture.scheme = scheme.clone();
        }
        if let Some(domain) = &self.dest_domain {
            config.fixture.domain = domain.clone();
        }
        if let Some(port) = self.dest_port {
            config.fixture.port = port;
        }
        if let Some(port) = self.tls_port {
            config.fixture.tls_port = port;
        }
        if let Some(cert) = &self.cert_file {
            config.fixture.cert_file = Some(cert.clone());
        }
        if let Some(key) = &self.key_file {
            config.fixture.key_file = Some(key.clone());
        }
        if let Some(report) = &self.report {
            config.run.report = report.clone();
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.config()?;

    match cli.command {
        Commands::Run { case } => {
            let summary = run::run(&config, case.as_deref()).await?;
            if !summary.passed() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Stop => stop::run(&config).await?,
        Commands::Hosts { output } => hosts::run(&config, output.as_deref()).await?,
        Commands::Fixture => fixture::run(&config).await?,
    }

    Ok(ExitCode::SUCCESS)
}
