//! Render the host table.

use anyhow::{Context, Result};
use crawlprobe::Config;
use probe_core::Topology;
use std::path::Path;

/// Run the command.
pub async fn run(config: &Config, output: Option<&Path>) -> Result<()> {
    let topology = Topology::compute(&config.topology_params()).context("Invalid cluster topology")?;
    let table = topology.host_table();

    match output {
        Some(path) => {
            tokio::fs::write(path, &table)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Host table written to {}", path.display());
        }
        None => print!("{table}"),
    }
    Ok(())
}
