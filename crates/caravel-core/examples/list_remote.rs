//! Basic usage example - list workspaces or the children of a source path

use caravel_core::{Backend, Locator, NativeBackend, NativeConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Server coordinates come from the environment
    let url =
        std::env::var("TRACKING_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let api_key = std::env::var("TRACKING_API_KEY").unwrap_or_default();

    let backend = NativeBackend::new(NativeConfig::new(&url, api_key))?;

    match std::env::args().nth(1) {
        Some(path) => {
            let locator = Locator::parse(&path)?;
            println!("Listing children of {}...", locator);
            let children = backend.enumerate_children(&locator).await?;
            if children.is_empty() {
                println!("No entries under {}.", locator);
            } else {
                println!("Found {} entries:", children.len());
                for child in children {
                    println!("  - {} [{}]", child.locator().path(), child.kind);
                }
            }
        }
        None => {
            println!("Listing workspaces on {}...", url);
            for workspace in backend.list_workspaces().await? {
                println!("  - {}", workspace.display_name());
            }
        }
    }

    Ok(())
}
