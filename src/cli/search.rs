//! Search command implementation

use anyhow::Result;

use super::{display_time, truncate};
use crate::reader::{ReaderRegistry, SearchOptions};

pub fn run(registry: &ReaderRegistry, query: &str, options: &SearchOptions) -> Result<()> {
    let results = registry.search_all(query, options)?;

    if results.is_empty() {
        println!("No conversations mention '{}'.", query);
        return Ok(());
    }

    println!(
        "{:<17} {:<17} {:<38} {}",
        "Updated", "Source", "ID", "Title"
    );
    println!("{}", "-".repeat(110));

    for conv in results {
        let title = conv
            .title
            .as_deref()
            .map(|t| truncate(t, 40))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<17} {:<17} {:<38} {}",
            display_time(&conv.updated_at),
            conv.source.as_str(),
            conv.id,
            title,
        );
    }

    Ok(())
}
