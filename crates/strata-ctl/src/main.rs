//! strata-ctl — command-line interface for Strata storage.

use std::path::PathBuf;

use anyhow::{Context, Result};

use strata_core::StrataConfig;

mod cmd;

fn print_usage() {
    println!("Usage: strata-ctl [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  upload <path>              Upload a file, print tx and root hash");
    println!("  download <root> <output>   Download and verify a file by root hash");
    println!("  root <path>                Compute a file's root hash locally");
    println!("  nodes [count]              List the storage nodes selection would pick");
    println!("  simulate <path>            Round-trip a file through an in-memory network");
    println!("  config                     Show the resolved configuration");
    println!();
    println!("Options:");
    println!("  --config <path>   Config file (default: $STRATA_CONFIG or ~/.config/strata/config.toml)");
    println!();
    println!("Logging is controlled with RUST_LOG, e.g. RUST_LOG=strata_transfer=debug.");
}

fn load_config(explicit: Option<PathBuf>) -> Result<StrataConfig> {
    if let Some(path) = explicit {
        return StrataConfig::load_from(path.clone())
            .with_context(|| format!("failed to load config from {}", path.display()));
    }
    if let Err(e) = StrataConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    Ok(StrataConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        StrataConfig::default()
    }))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --config option
    let mut config_path = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            config_path = Some(PathBuf::from(
                args.get(i).context("--config requires a value")?,
            ));
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    if matches!(remaining.as_slice(), [] | ["help"] | ["--help"] | ["-h"]) {
        print_usage();
        return Ok(());
    }
    let config = load_config(config_path)?;

    match remaining.as_slice() {
        ["upload", path]             => cmd::transfer::upload(config, path).await,
        ["download", root, output]   => cmd::transfer::download(config, root, output).await,
        ["root", path]               => cmd::transfer::root(config, path),
        ["nodes"]                    => cmd::nodes::list(config, None).await,
        ["nodes", count]             => {
            let count = count.parse().context("count must be a number")?;
            cmd::nodes::list(config, Some(count)).await
        }
        ["simulate", path]           => cmd::simulate::run(config, path).await,
        ["config"]                   => cmd::nodes::show_config(&config),
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
