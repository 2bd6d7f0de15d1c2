//! Pull a workspace, project or experiment into a local mirror.
//!
//! Usage:
//!   cargo run --package caravel-core --example pull_mirror -- <source-path> [mirror-dir]

use std::sync::Arc;

use caravel_core::store::{LayoutMode, LocalStore, NamingMode};
use caravel_core::{Locator, Migrator, NativeBackend, NativeConfig, PullOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Get source path and mirror directory from args
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <source-path> [mirror-dir]", args[0]);
        eprintln!("Example: {} team/vision ./caravel-mirror", args[0]);
        std::process::exit(1);
    }

    let locator = Locator::parse(&args[1])?;
    let mirror = args.get(2).map(|s| s.as_str()).unwrap_or("./caravel-mirror");

    let url =
        std::env::var("TRACKING_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let api_key = std::env::var("TRACKING_API_KEY").unwrap_or_default();

    let source = Arc::new(NativeBackend::new(NativeConfig::new(&url, api_key))?);
    let store = LocalStore::new(mirror, LayoutMode::Nested, NamingMode::ById)?;
    let migrator = Migrator::builder().source(source).store(store).build()?;

    let estimate = migrator.estimate(&locator).await?;
    println!(
        "Pulling {} into {} ({} leaf entities estimated)...",
        locator, mirror, estimate.leaf_entities
    );

    let report = migrator.pull(&locator, PullOptions::default()).await?;
    print!("{}", report.summary());
    Ok(())
}
