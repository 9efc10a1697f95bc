//! Autolink command implementation

use anyhow::Result;
use chrono::Utc;

use super::short_hash;
use crate::error::TetherError;
use crate::linker::{auto_link_commit, AutoLinkOptions};
use crate::store::LinkStore;

pub fn run(store: &mut LinkStore, commit: &str, options: &AutoLinkOptions) -> Result<()> {
    let hash = match store.get_commit(commit)? {
        Some(c) => c.hash,
        None => store
            .resolve_commit_prefix(commit)?
            .ok_or_else(|| TetherError::UnknownCommit(commit.to_string()))?,
    };

    let scores = auto_link_commit(store, &hash, options, Utc::now())?;
    if scores.is_empty() {
        println!("No conversations scored above {:.2} for {}.", options.min_score, short_hash(&hash));
        return Ok(());
    }

    println!(
        "{:<38} {:>6} {:>8} {:>8}  {}",
        "Conversation", "Score", "Overlap", "Recency", "Files"
    );
    println!("{}", "-".repeat(100));
    for score in scores {
        println!(
            "{:<38} {:>6.3} {:>8.3} {:>8.3}  {}",
            score.conversation_id,
            score.score,
            score.file_overlap,
            score.recency,
            score.matched_files.join(", "),
        );
    }
    Ok(())
}
