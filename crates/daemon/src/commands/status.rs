//! Status command - shows paths and local store state.

use anyhow::Result;
use courier_core::{platform, Config, LocalStore};

pub async fn execute() -> Result<()> {
    let config = Config::load_with_env()?;

    println!("Courier Status");
    println!("==============");
    println!();

    // Show paths
    println!("Paths:");
    println!("  Config:    {:?}", platform::config_dir());
    println!("  Data:      {:?}", config.data_dir);
    println!("  Database:  {:?}", config.database_path());

    println!();

    // Show config file status
    let config_file = platform::config_file_path();
    if config_file.exists() {
        println!("Config file: {:?}", config_file);
    } else {
        println!("Config file: Not found (using defaults)");
    }

    println!();

    // Show store status
    let db_path = config.database_path();
    if db_path.exists() {
        match LocalStore::open(&db_path, config.cache_capacity) {
            Ok(store) => {
                println!("Queue:       {} message(s)", store.queue().len());
                println!(
                    "Cache:       {} / {} message(s)",
                    store.cache().read()?.len(),
                    store.cache().capacity()
                );
            }
            Err(e) => println!("Database:    \x1b[31m○ Unavailable\x1b[0m ({})", e),
        }
    } else {
        println!("Database:    Not created yet");
    }

    println!();

    // Show feature status
    let responder = &config.responder;
    println!("Assistant:");
    println!("  Policy:    {:?}", responder.policy);
    if responder.api_key.is_some() {
        println!("  API key:   \x1b[32m● Configured\x1b[0m");
    } else {
        println!("  API key:   \x1b[31m○ Missing\x1b[0m");
    }
    match &config.upload.cloud_name {
        Some(name) => println!("Uploads:     \x1b[32m● Enabled\x1b[0m ({})", name),
        None => println!("Uploads:     \x1b[31m○ Disabled\x1b[0m (no cloud name)"),
    }
    match &config.probe.address {
        Some(address) => println!("Probe:       {} every {}s", address, config.probe.interval_secs),
        None => println!("Probe:       Disabled"),
    }

    Ok(())
}
