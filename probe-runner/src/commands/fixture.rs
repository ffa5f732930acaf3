//! Serve the fixture tree standalone.

use anyhow::{Context, Result};
use crawlprobe::Config;
use probe_fixture::{FixtureServer, ServedUrlLog};

/// Run the command until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let fixture_config = config
        .fixture_settings(config.port_stride())
        .context("Invalid fixture port")?;

    let server = FixtureServer::start(fixture_config, ServedUrlLog::new())
        .await
        .context("Failed to start fixture server")?;
    println!("Serving {} on {}", config.run.test_dir.display(), server.local_addr());
    if let Some(addr) = server.tls_addr() {
        println!("Serving HTTPS on {addr}");
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Served {} requests", server.log().len());
    server.stop().await;
    Ok(())
}
