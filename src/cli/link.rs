//! Manual link command implementation

use anyhow::Result;
use chrono::Utc;

use super::short_hash;
use crate::linker::link_manually;
use crate::store::LinkStore;

pub fn run(
    store: &mut LinkStore,
    conversation: &str,
    commit: &str,
    confidence: Option<f64>,
) -> Result<()> {
    let link = link_manually(store, conversation, commit, confidence, Utc::now())?;
    println!(
        "Linked conversation '{}' to commit {} (manual, confidence {:.2})",
        link.conversation_id,
        short_hash(&link.commit_hash),
        link.confidence
    );
    if !link.matched_files.is_empty() {
        println!("  shared files: {}", link.matched_files.join(", "));
    }
    Ok(())
}
