//! Round trip through an in-process five-node network.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};

use strata_core::StrataConfig;
use strata_transfer::{MemoryNetwork, StorageClient};

const SIMULATED_NODES: usize = 5;

pub async fn run(config: StrataConfig, path: &str) -> Result<()> {
    let net = MemoryNetwork::with_nodes(SIMULATED_NODES);
    let replicas = config.transfer.replicas;
    let client = StorageClient::new(config, net.clone(), net.clone(), net.clone())
        .context("invalid transfer configuration")?;

    let started = Instant::now();
    let (tx, root) = client
        .upload_file(Path::new(path))
        .await
        .with_context(|| format!("upload of {path} failed"))?;
    let uploaded = started.elapsed();

    let output = std::env::temp_dir().join(format!(
        "strata-simulate-{}-{}",
        std::process::id(),
        root.trim_start_matches("0x")
    ));
    client
        .download_file(&root, &output)
        .await
        .with_context(|| format!("download of {root} failed"))?;
    let downloaded = started.elapsed() - uploaded;

    let original = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
    let copy = std::fs::read(&output).context("failed to read downloaded copy")?;
    let _ = std::fs::remove_file(&output);
    if original != copy {
        bail!("round trip mismatch: downloaded copy differs from {path}");
    }

    println!("═══════════════════════════════════════");
    println!("  Simulated Round Trip");
    println!("═══════════════════════════════════════");
    println!("  nodes      : {SIMULATED_NODES}");
    println!("  replicas   : {replicas}");
    println!("  bytes      : {}", original.len());
    println!("  tx         : {tx}");
    println!("  root       : {root}");
    println!("  upload     : {:.3}s", uploaded.as_secs_f64());
    println!("  download   : {:.3}s", downloaded.as_secs_f64());
    println!("  stored     : {}", stored_summary(&net));
    Ok(())
}

fn stored_summary(net: &Arc<MemoryNetwork>) -> String {
    (0..SIMULATED_NODES)
        .map(|i| net.stored_chunks(&format!("node-{i}")).to_string())
        .collect::<Vec<_>>()
        .join(" / ")
}
