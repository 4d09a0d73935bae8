//! upload, download and root commands.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};

use strata_core::StrataConfig;
use strata_transfer::StorageClient;

fn client(config: StrataConfig) -> Result<StorageClient> {
    StorageClient::connect(config).context("failed to set up storage client")
}

pub async fn upload(config: StrataConfig, path: &str) -> Result<()> {
    let client = client(config)?;
    let started = Instant::now();
    let (tx, root) = client
        .upload_file(Path::new(path))
        .await
        .with_context(|| format!("upload of {path} failed"))?;

    println!("Uploaded {path} in {:.1}s", started.elapsed().as_secs_f64());
    println!("  tx   : {tx}");
    println!("  root : {root}");
    Ok(())
}

pub async fn download(config: StrataConfig, root: &str, output: &str) -> Result<()> {
    let verify = config.transfer.verify;
    let client = client(config)?;
    let started = Instant::now();
    client
        .download_file(root, Path::new(output))
        .await
        .with_context(|| format!("download of {root} failed"))?;

    println!(
        "Downloaded {root} to {output} in {:.1}s{}",
        started.elapsed().as_secs_f64(),
        if verify { " (verified)" } else { "" }
    );
    Ok(())
}

pub fn root(config: StrataConfig, path: &str) -> Result<()> {
    let root = client(config)?
        .root_of(Path::new(path))
        .with_context(|| format!("failed to hash {path}"))?;
    println!("{root}");
    Ok(())
}
