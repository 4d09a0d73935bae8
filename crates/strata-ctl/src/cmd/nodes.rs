//! Node listing and config display.

use anyhow::{Context, Result};

use strata_core::StrataConfig;
use strata_transfer::StorageClient;

pub async fn list(config: StrataConfig, count: Option<usize>) -> Result<()> {
    let strategy = config.transfer.strategy;
    let count = count.unwrap_or(config.transfer.replicas + config.transfer.spare_nodes);
    let client = StorageClient::connect(config).context("failed to set up storage client")?;
    let set = client
        .selector()
        .select(1, count, &[], strategy)
        .await
        .context("node selection failed")?;

    println!("═══════════════════════════════════════");
    println!("  Storage Nodes ({}, strategy {})", set.len(), strategy);
    println!("═══════════════════════════════════════");
    for node in set.nodes() {
        println!("  ┌─ {}", node.id);
        println!("  │  url      : {}", node.url);
        println!("  │  capacity : {} bytes", node.capacity);
        println!("  │  latency  : {} ms", node.latency_ms);
        println!("  └─ health   : {:?}", node.health);
    }
    Ok(())
}

pub fn show_config(config: &StrataConfig) -> Result<()> {
    println!("# {}", StrataConfig::file_path().display());
    print!("{}", config.to_toml()?);
    Ok(())
}
