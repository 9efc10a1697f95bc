//! Conversations command implementation

use anyhow::Result;

use super::{display_time, truncate};
use crate::store::{ConversationFilter, LinkStore};

pub fn run(store: &LinkStore, filter: &ConversationFilter) -> Result<()> {
    let conversations = store.find_conversations(filter)?;

    if conversations.is_empty() {
        println!("No conversations recorded. Install the editor hooks to start capturing.");
        return Ok(());
    }

    println!(
        "{:<17} {:<38} {:<16} {:<14} {:>5} {}",
        "Updated", "ID", "Project", "Agent", "Files", "Title"
    );
    println!("{}", "-".repeat(110));

    for conv in conversations {
        let title = conv
            .title
            .as_deref()
            .map(|t| truncate(t, 35))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<17} {:<38} {:<16} {:<14} {:>5} {}",
            display_time(&conv.updated_at),
            conv.id,
            truncate(&conv.project_name, 16),
            conv.agent,
            conv.all_files().len(),
            title,
        );
    }

    Ok(())
}
