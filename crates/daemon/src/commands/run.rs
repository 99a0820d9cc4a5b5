//! Run command - interactive chat session.
//!
//! Lines typed on stdin become messages. Slash commands drive the session:
//! `/offline`, `/online`, `/queue`, `/retry <id>`, `/read <id>`,
//! `/delete <id>`, `/unread`, `/image <path> [caption]`, `/clear`, `/quit`.

use anyhow::Result;
use courier_core::chat::{ChatEvent, HttpUploader, ImageUploader};
use courier_core::net::{spawn_probe_loop, TcpProbe};
use courier_core::{
    ChatMessage, ChatSession, Config, ConnectivityMonitor, Draft, MemoryRemoteStore, MessageId,
    ResponderGate, Sender, SessionDeps,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use super::{format_message, open_store};

pub async fn execute(config_path: Option<String>, user: String, name: String) -> Result<()> {
    // Load configuration
    let config = if let Some(path) = config_path {
        info!("Loading config from: {}", path);
        let mut config = Config::load_from(Path::new(&path))?;
        config.apply_env()?;
        config
    } else {
        Config::load_with_env()?
    };

    info!("Courier v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", config.data_dir);

    let store = open_store(&config)?;
    let queued = store.queue().len();
    if queued > 0 {
        info!("{} message(s) waiting in the outgoing queue", queued);
    }

    let remote = Arc::new(MemoryRemoteStore::new());
    let connectivity = ConnectivityMonitor::new(true);

    // Optional reachability probe
    let _probe = config.probe.address.as_ref().map(|address| {
        info!("Probing connectivity via {}", address);
        spawn_probe_loop(
            connectivity.clone(),
            Arc::new(TcpProbe::new(
                address.clone(),
                Duration::from_secs(config.probe.timeout_secs),
            )),
            Duration::from_secs(config.probe.interval_secs),
        )
    });

    let gate = ResponderGate::from_config(&config.responder);
    let uploader: Option<Arc<dyn ImageUploader>> = match HttpUploader::new(&config.upload) {
        Ok(uploader) => Some(Arc::new(uploader)),
        Err(e) => {
            debug!("Image upload disabled: {}", e);
            None
        }
    };

    let printed = Mutex::new(HashSet::new());
    let session = ChatSession::start(
        &config,
        &store,
        SessionDeps {
            remote: remote.clone(),
            connectivity: connectivity.clone(),
            gate,
            uploader,
        },
        move |messages: Vec<ChatMessage>| {
            let mut printed = printed.lock().unwrap_or_else(|e| e.into_inner());
            for message in &messages {
                if printed.insert(message.id().clone()) {
                    println!("{}", format_message(message));
                }
            }
        },
    );

    // Report delivery problems as they happen
    let mut events = session.dispatcher().subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ChatEvent::MessageQueued { message } => {
                    println!("  (queued {} while offline)", message.id())
                }
                ChatEvent::MessageFailed { message_id, error } => {
                    println!("  (delivery of {} failed: {})", message_id, error)
                }
                ChatEvent::PendingFlushed { count, remaining } => {
                    println!("  (delivered {} queued, {} remaining)", count, remaining)
                }
                other => debug!("Chat event: {:?}", other),
            }
        }
    });

    let sender = Sender::new(user, name);
    println!("Type a message and press Enter. /quit to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match handle_line(&session, &remote, &sender, line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => error!("{}", e),
        }
    }

    // Graceful shutdown
    info!("Shutting down chat session...");
    session.shutdown();
    event_task.abort();

    let remaining = store.queue().len();
    if remaining > 0 {
        warn!("{} message(s) remain queued for the next session", remaining);
    }
    store.flush()?;

    info!("Session closed");
    Ok(())
}

/// Handle one input line. Returns false when the session should end.
async fn handle_line(
    session: &ChatSession,
    remote: &MemoryRemoteStore,
    sender: &Sender,
    line: &str,
) -> Result<bool> {
    let Some(command) = line.strip_prefix('/') else {
        session.submit(Draft::text(sender.clone(), line)).await?;
        return Ok(true);
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => return Ok(false),
        "offline" => {
            remote.set_online(false);
            session.connectivity().set_connected(false);
            println!("  (offline)");
        }
        "online" => {
            remote.set_online(true);
            session.connectivity().set_connected(true);
            println!("  (online)");
        }
        "queue" => {
            let pending = session.dispatcher().pending_messages()?;
            if pending.is_empty() {
                println!("  Queue is empty.");
            }
            for message in pending {
                println!("  {} [{}] {}", message.id(), message.status(), message.preview());
            }
        }
        "retry" => {
            let message = session.dispatcher().resend(&MessageId::from(arg)).await?;
            println!("  (resent {})", message.id());
        }
        "read" => session.dispatcher().mark_as_read(&MessageId::from(arg)).await?,
        "delete" => session.dispatcher().delete_message(&MessageId::from(arg)).await?,
        "unread" => {
            let count = session.dispatcher().unread_count(&sender.id).await?;
            println!("  {} unread message(s)", count);
        }
        "image" => {
            let (path, caption) = arg
                .split_once(char::is_whitespace)
                .map(|(p, c)| (p, Some(c.trim().to_string())))
                .unwrap_or((arg, None));
            session
                .send_image(Path::new(path), sender.clone(), caption)
                .await?;
        }
        "clear" => {
            let removed = session.dispatcher().clear_all().await?;
            println!("  (cleared {} message(s))", removed);
        }
        "messages" => {
            for message in session.messages()? {
                println!("{}", format_message(&message));
            }
        }
        other => println!("  Unknown command: /{}", other),
    }

    Ok(true)
}
