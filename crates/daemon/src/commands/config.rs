//! Config command - view or modify configuration.

use anyhow::{bail, Result};
use courier_core::chat::ResponsePolicy;
use courier_core::Config;

pub async fn execute(key: Option<String>, value: Option<String>) -> Result<()> {
    let mut config = Config::load_with_env()?;

    match (key.as_deref(), value) {
        (None, None) => {
            // Show all config, without secrets
            let mut shown = config.clone();
            if shown.responder.api_key.is_some() {
                shown.responder.api_key = Some("********".to_string());
            }
            println!("Current Configuration");
            println!("=====================");
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        (Some(key), None) => {
            // Get specific key
            match key {
                "data_dir" => println!("{:?}", config.data_dir),
                "cache_capacity" => println!("{}", config.cache_capacity),
                "append_timeout_secs" => println!("{}", config.append_timeout_secs),
                "ai_policy" => println!("{:?}", config.responder.policy),
                "api_key" => println!(
                    "{}",
                    if config.responder.api_key.is_some() { "(set)" } else { "(not set)" }
                ),
                "cloud_name" => println!("{:?}", config.upload.cloud_name),
                "probe_address" => println!("{:?}", config.probe.address),
                _ => println!("Unknown config key: {}", key),
            }
        }
        (Some(key), Some(value)) => {
            // Set specific key
            match key {
                "data_dir" => {
                    config.data_dir = value.into();
                    config.save()?;
                    println!("Set data_dir = {:?}", config.data_dir);
                }
                "cache_capacity" => {
                    config.cache_capacity = value.parse()?;
                    config.save()?;
                    println!("Set cache_capacity = {}", config.cache_capacity);
                }
                "append_timeout_secs" => {
                    config.append_timeout_secs = value.parse()?;
                    config.save()?;
                    println!("Set append_timeout_secs = {}", config.append_timeout_secs);
                }
                "ai_policy" => {
                    config.responder.policy = match value.parse::<ResponsePolicy>() {
                        Ok(policy) => policy,
                        Err(e) => bail!(e),
                    };
                    config.save()?;
                    println!("Set ai_policy = {:?}", config.responder.policy);
                }
                "api_key" => {
                    config.responder.api_key = optional(value);
                    config.save()?;
                    println!("Set api_key");
                }
                "cloud_name" => {
                    config.upload.cloud_name = optional(value);
                    config.save()?;
                    println!("Set cloud_name = {:?}", config.upload.cloud_name);
                }
                "probe_address" => {
                    config.probe.address = optional(value);
                    config.save()?;
                    println!("Set probe_address = {:?}", config.probe.address);
                }
                _ => println!("Cannot set config key: {}", key),
            }
        }
        (None, Some(_)) => {
            println!("Must specify a key to set a value");
        }
    }

    Ok(())
}

/// Empty values clear optional settings.
fn optional(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
