//! Links command implementation

use anyhow::Result;

use super::{display_time, short_hash, truncate};
use crate::store::LinkStore;

pub fn for_conversation(store: &LinkStore, conversation_id: &str) -> Result<()> {
    let links = store.get_links_for_conversation(conversation_id)?;
    if links.is_empty() {
        println!("No commits linked to conversation '{}'.", conversation_id);
        return Ok(());
    }

    println!(
        "{:<12} {:<17} {:<7} {:<6} {}",
        "Commit", "Committed", "Status", "Conf", "Message"
    );
    println!("{}", "-".repeat(90));
    for linked in links {
        println!(
            "{:<12} {:<17} {:<7} {:<6.2} {}",
            short_hash(&linked.commit.hash),
            display_time(&linked.commit.committed_at),
            linked.link.status.as_str(),
            linked.link.confidence,
            truncate(&linked.commit.message, 40),
        );
    }
    Ok(())
}

pub fn for_commit(store: &LinkStore, commit: &str) -> Result<()> {
    // Accept a short hash when it is unambiguous
    let hash = match store.get_commit(commit)? {
        Some(c) => c.hash,
        None => store
            .resolve_commit_prefix(commit)?
            .unwrap_or_else(|| commit.to_string()),
    };

    let links = store.get_links_for_commit(&hash)?;
    if links.is_empty() {
        println!("No conversations linked to commit {}.", short_hash(&hash));
        return Ok(());
    }

    println!(
        "{:<38} {:<14} {:<7} {:<6} {}",
        "Conversation", "Agent", "Status", "Conf", "Title"
    );
    println!("{}", "-".repeat(100));
    for linked in links {
        let title = linked
            .conversation
            .title
            .as_deref()
            .map(|t| truncate(t, 35))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<14} {:<7} {:<6.2} {}",
            linked.conversation.id,
            linked.conversation.agent,
            linked.link.status.as_str(),
            linked.link.confidence,
            title,
        );
        if !linked.link.matched_files.is_empty() {
            println!("    files: {}", linked.link.matched_files.join(", "));
        }
    }
    Ok(())
}
