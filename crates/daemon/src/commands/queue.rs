//! Queue command - lists messages waiting for delivery.

use anyhow::Result;
use courier_core::Config;

use super::open_store;

pub async fn execute() -> Result<()> {
    let config = Config::load_with_env()?;
    let store = open_store(&config)?;
    let entries = store.queue().list_all()?;

    println!("Outgoing Queue");
    println!("==============");
    println!();

    if entries.is_empty() {
        println!("No queued messages.");
        return Ok(());
    }

    for entry in &entries {
        let message = &entry.message;
        println!("  {} [{}]", message.id(), message.status());
        println!("    From:    {} ({})", message.sender_name(), message.sender_id());
        println!("    Queued:  {}", entry.queued_at.format("%Y-%m-%d %H:%M:%S"));
        println!("    Retries: {}", entry.retry_count);
        println!("    Content: {}", message.preview());
        println!();
    }

    println!("Total: {} message(s)", entries.len());
    Ok(())
}
