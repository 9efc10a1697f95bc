//! Commits command implementation

use anyhow::Result;

use super::{display_time, short_hash, truncate};
use crate::store::{CommitFilter, LinkStore};

pub fn run(store: &LinkStore, filter: &CommitFilter) -> Result<()> {
    let commits = store.find_commits(filter)?;

    if commits.is_empty() {
        println!("No commits recorded. Install the post-commit hook to start capturing.");
        return Ok(());
    }

    println!(
        "{:<12} {:<17} {:<16} {:>5} {}",
        "Commit", "Committed", "Branch", "Files", "Message"
    );
    println!("{}", "-".repeat(100));

    for commit in commits {
        println!(
            "{:<12} {:<17} {:<16} {:>5} {}",
            short_hash(&commit.hash),
            display_time(&commit.committed_at),
            truncate(commit.branch.as_deref().unwrap_or("-"), 16),
            commit.changed_files.len(),
            truncate(&commit.message, 45),
        );
    }

    Ok(())
}
