//! Stats command implementation

use anyhow::Result;
use std::path::Path;

use crate::store::LinkStore;

pub fn run(store: &LinkStore, db_path: &Path) -> Result<()> {
    let stats = store.stats()?;
    println!("Store: {}", db_path.display());
    println!("Conversations: {}", stats.conversations);
    println!("Commits:       {}", stats.commits);
    println!(
        "Links:         {} ({} auto, {} manual)",
        stats.links, stats.auto_links, stats.manual_links
    );
    Ok(())
}
