//! Context command implementation

use anyhow::Result;

use super::{display_time, short_hash, truncate};
use crate::store::LinkStore;

pub fn run(store: &LinkStore, file: &str, keyword: Option<&str>) -> Result<()> {
    let context = store.file_context(file, keyword)?;

    if context.conversations.is_empty() && context.commits.is_empty() {
        println!("Nothing recorded for '{}'.", file);
        return Ok(());
    }

    println!("\n{}", "=".repeat(80));
    println!("Context for: {}", file);
    if let Some(keyword) = keyword {
        println!("Keyword: {}", keyword);
    }
    println!("{}", "=".repeat(80));

    if !context.conversations.is_empty() {
        println!("\nConversations ({}):", context.conversations.len());
        for entry in &context.conversations {
            let conv = &entry.conversation;
            println!(
                "\n  [{}] {} | {} | {} ({})",
                entry.match_kind.as_str(),
                conv.id,
                conv.agent,
                display_time(&conv.updated_at),
                entry.matched_file,
            );
            if let Some(title) = &conv.title {
                println!("    {}", truncate(title, 70));
            }
            for excerpt in &entry.excerpts {
                println!("    > {}", excerpt);
            }
        }
    }

    if !context.commits.is_empty() {
        println!("\nCommits ({}):", context.commits.len());
        for entry in &context.commits {
            println!(
                "  [{}] {} {} {} ({})",
                entry.match_kind.as_str(),
                short_hash(&entry.commit.hash),
                display_time(&entry.commit.committed_at),
                truncate(&entry.commit.message, 50),
                entry.matched_file,
            );
        }
    }

    Ok(())
}
