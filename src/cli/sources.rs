//! Sources command implementation

use anyhow::Result;

use crate::reader::ReaderRegistry;

pub fn run(registry: &ReaderRegistry) -> Result<()> {
    let readers = registry.all_readers();

    if readers.is_empty() {
        println!("No readers enabled. Check your configuration.");
        return Ok(());
    }

    println!("{:<18} {:<10} {}", "Source", "Status", "Description");
    println!("{}", "-".repeat(80));
    for reader in readers {
        let status = if reader.is_available() {
            "found"
        } else {
            "missing"
        };
        println!(
            "{:<18} {:<10} {}",
            reader.agent().as_str(),
            status,
            reader.description()
        );
    }

    Ok(())
}
