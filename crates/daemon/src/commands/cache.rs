//! Cache command - shows the offline message snapshot.

use anyhow::Result;
use courier_core::Config;

use super::{format_message, open_store};

pub async fn execute(limit: Option<usize>) -> Result<()> {
    let config = Config::load_with_env()?;
    let store = open_store(&config)?;
    let messages = store.cache().read()?;

    if messages.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }

    let start = limit.map_or(0, |n| messages.len().saturating_sub(n));
    for message in &messages[start..] {
        println!("{}", format_message(message));
    }

    println!();
    println!(
        "Showing {} of {} cached message(s) (capacity {})",
        messages.len() - start,
        messages.len(),
        store.cache().capacity()
    );
    Ok(())
}
