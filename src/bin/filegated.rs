use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use filegate::access::{AccessFilter, SystemResolver};
use filegate::cli::DaemonOpts;
use filegate::config::DaemonConfig;
use filegate::logger::setup_logging;
use filegate::{serve, ServerContext};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    setup_logging(opts.verbose);

    let config = DaemonConfig::from_opts(&opts)?;
    let password = config.password()?.to_string();

    // Validate root directory exists and is a directory
    if !config.root.exists() {
        anyhow::bail!("Root directory does not exist: {}", config.root.display());
    }
    if !config.root.is_dir() {
        anyhow::bail!("Root path is not a directory: {}", config.root.display());
    }
    let canonical_root = std::fs::canonicalize(&config.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", config.root.display()))?;

    let filter = AccessFilter::new(&config.deny, Arc::new(SystemResolver));

    println!("Starting filegate daemon:");
    println!("  Root: {}", canonical_root.display());
    println!("  Bind: {}", config.bind);
    if !filter.is_empty() {
        println!("  Deny: {}", config.deny.join(", "));
    }

    if config.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   Traffic (including the password) is UNENCRYPTED; only use on trusted networks");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let ctx = ServerContext::new(password, canonical_root, filter);
    rt.block_on(serve(&config.bind, ctx))
}
