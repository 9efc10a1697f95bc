//! Read command implementation

use anyhow::Result;

use super::display_time;
use crate::reader::{CanonicalMessage, ReaderRegistry};

pub fn run(registry: &ReaderRegistry, id: &str, source: Option<&str>, files: bool) -> Result<()> {
    let conversation = match source {
        Some(tag) => match registry.get_reader(tag) {
            Some(reader) => reader.get_conversation(id)?,
            None => {
                println!("Unknown source '{}'. Run 'tether sources' to list them.", tag);
                return Ok(());
            }
        },
        None => registry.find_conversation(id)?,
    };

    let conversation = match conversation {
        Some(c) => c,
        None => {
            println!("Conversation '{}' not found in any source.", id);
            return Ok(());
        }
    };

    println!("\n{}", "=".repeat(80));
    println!("Conversation: {}", conversation.id);
    println!("Source: {}", conversation.source);
    if let Some(title) = &conversation.title {
        println!("Title: {}", title);
    }
    if let Some(project) = &conversation.project_path {
        println!("Project: {}", project);
    }
    println!(
        "Time: {} .. {}",
        display_time(&conversation.created_at),
        display_time(&conversation.updated_at)
    );
    println!("{}", "=".repeat(80));

    if conversation.messages.is_empty() {
        println!("\nNo messages found (this may be an empty conversation).");
    }

    for msg in &conversation.messages {
        print_message(msg, files);
        println!("{}", "-".repeat(40));
    }

    if !conversation.files.is_empty() {
        println!("\nFiles ({}):", conversation.files.len());
        for file in &conversation.files {
            println!("  {}", file);
        }
    }
    if !conversation.folders.is_empty() {
        println!("\nFolders:");
        for folder in &conversation.folders {
            println!("  {}", folder);
        }
    }

    Ok(())
}

fn print_message(msg: &CanonicalMessage, files: bool) {
    let when = msg
        .timestamp
        .as_ref()
        .map(display_time)
        .unwrap_or_else(|| "?".to_string());
    println!("\n[{}] ({})", msg.role.as_str().to_uppercase(), when);

    if !msg.text.trim().is_empty() {
        println!("{}", msg.text.trim());
    }
    for block in &msg.code_blocks {
        println!("```{}", block.language.as_deref().unwrap_or(""));
        println!("{}", block.content.trim_end());
        println!("```");
    }
    if files && !msg.files.is_empty() {
        println!("  files: {}", msg.files.join(", "));
    }
}
