//! Stop a running cluster.

use anyhow::{Context, Result};
use crawlprobe::{suite, ClusterControl, Config};
use probe_core::Topology;

/// Run the command. A stop that times out counts as stopped.
pub async fn run(config: &Config) -> Result<()> {
    let topology = Topology::compute(&config.topology_params()).context("Invalid cluster topology")?;
    suite::cluster_for(config, &topology)
        .stop()
        .await
        .context("Failed to stop cluster")?;
    println!("Cluster stopped");
    Ok(())
}
