//! Clear command - wipes local stores.

use anyhow::Result;
use courier_core::Config;
use tracing::warn;

use super::open_store;

pub async fn execute(include_queue: bool) -> Result<()> {
    let config = Config::load_with_env()?;
    let store = open_store(&config)?;

    let cached = store.cache().read()?.len();
    store.cache().clear()?;
    println!("Cleared {} cached message(s).", cached);

    let queue = store.queue();
    if include_queue {
        let queued = queue.len();
        if queued > 0 {
            warn!("Dropping {} undelivered message(s)", queued);
        }
        queue.clear()?;
        println!("Cleared {} queued message(s).", queued);
    } else if !queue.is_empty() {
        println!(
            "{} queued message(s) kept; pass --include-queue to drop them.",
            queue.len()
        );
    }

    store.flush()?;
    Ok(())
}
