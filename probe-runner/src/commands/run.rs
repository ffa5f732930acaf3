//! Run the test suite.

use anyhow::{Context, Result};
use crawlprobe::{suite, Config};
use probe_core::Summary;

/// Run the command. The summary decides the exit code.
pub async fn run(config: &Config, case: Option<&str>) -> Result<Summary> {
    let summary = suite::run(config, case).await.context("Test run aborted")?;

    println!(
        "{} test cases, {} checks, {} failed",
        summary.suites, summary.tests, summary.failures
    );
    println!("Report: {}", config.run.report.display());
    Ok(summary)
}
