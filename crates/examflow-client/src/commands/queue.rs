//! Queue commands.
//!
//! Each command opens its own session, does one thing and disconnects.
//! Results go to stdout as JSON.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::facade::QueueSession;
use crate::session::{CommandError, SessionState};

/// Connects and waits until the broker accepts the handshake.
async fn open(config: &ClientConfig) -> ClientResult<QueueSession> {
    let session_config = config.to_session_config().map_err(ClientError::Config)?;
    let credential = config.resolve_token().map_err(ClientError::Config)?;
    let session = QueueSession::new(session_config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let connected = tx.clone();
    session.connect(
        credential,
        move || {
            let _ = connected.send(Ok(()));
        },
        move |e| {
            let _ = tx.send(Err(e.clone()));
        },
    );

    match rx.recv().await {
        Some(Ok(())) => {
            debug!(endpoint = %session.config().endpoint(), "connected");
            Ok(session)
        }
        Some(Err(e)) => {
            session.disconnect();
            Err(ClientError::Connection(e.to_string()))
        }
        None => Err(ClientError::Connection("session stopped".to_string())),
    }
}

fn command_failed(err: CommandError) -> ClientError {
    match err {
        CommandError::TimedOut { .. } => ClientError::Timeout(err.to_string()),
        other => ClientError::Command(other),
    }
}

fn print_json(value: &impl serde::Serialize) -> ClientResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ClientError::Config(format!("failed to render output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Takes the next item of `queue` and prints it.
pub async fn take_next(config: &ClientConfig, queue: &str) -> ClientResult<()> {
    let session = open(config).await?;
    let mut items = session.queue_items()?;
    let mut errors = session.errors()?;
    session.take_next_item(queue)?;
    info!(queue, "take-next sent");

    let result = tokio::select! {
        Some(item) = items.next() => Ok(item),
        Some(err) = errors.next() => Err(command_failed(err)),
        else => Err(ClientError::Connection("session closed before a reply".to_string())),
    };
    session.disconnect();

    print_json(&result?)
}

/// Prints the size of `queue`.
pub async fn queue_size(config: &ClientConfig, queue: &str) -> ClientResult<()> {
    let session = open(config).await?;
    let mut sizes = session.queue_sizes()?;
    let mut errors = session.errors()?;
    session.query_queue_size(queue)?;

    let result = tokio::select! {
        Some(size) = sizes.next() => Ok(size),
        Some(err) = errors.next() => Err(command_failed(err)),
        else => Err(ClientError::Connection("session closed before a reply".to_string())),
    };
    session.disconnect();

    print_json(&json!({ "queue": queue, "size": result? }))
}

/// Prints the item this staff member holds, if the server redelivers one
/// within `wait`.
pub async fn in_progress(config: &ClientConfig, wait: Duration) -> ClientResult<()> {
    let session = open(config).await?;
    let mut items = session.queue_items()?;
    let mut errors = session.errors()?;
    session.get_in_progress_item()?;

    let result = tokio::select! {
        Some(item) = items.next() => Ok(Some(item)),
        Some(err) = errors.next() => Err(command_failed(err)),
        _ = tokio::time::sleep(wait) => Ok(None),
    };
    session.disconnect();

    match result? {
        Some(item) => print_json(&item),
        None => {
            println!("No item in progress.");
            Ok(())
        }
    }
}

/// Prints every broadcast, item, size reply and error until Ctrl-C.
pub async fn watch(config: &ClientConfig, queues: &[String]) -> ClientResult<()> {
    let session = open(config).await?;
    let mut handles = Vec::new();

    if queues.is_empty() {
        handles.push(session.subscribe_to_reception_queue(|update| {
            println!("{}", json!({ "event": "broadcast", "queue": "reception", "payload": update }));
        })?);
    }
    for queue in queues {
        let name = queue.clone();
        handles.push(session.subscribe_to_queue_broadcast(queue, move |update| {
            println!("{}", json!({ "event": "broadcast", "queue": name, "payload": update }));
        })?);
    }
    handles.push(session.subscribe_to_queue_items(|item| {
        println!("{}", json!({ "event": "item", "payload": item }));
    })?);
    handles.push(session.subscribe_to_queue_size(|size| {
        println!("{}", json!({ "event": "size", "payload": size }));
    })?);
    handles.push(session.subscribe_to_errors(|err| {
        println!("{}", json!({ "event": "error", "message": err.to_string() }));
    })?);

    let mut state = session.watch_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            _ = &mut ctrl_c => break Ok(()),
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                info!(state = %current, "session state changed");
                if current == SessionState::Failed {
                    let reason = session
                        .status()
                        .last_error
                        .unwrap_or_else(|| "session failed".to_string());
                    warn!(%reason, "giving up");
                    break Err(ClientError::Connection(reason));
                }
            }
        }
    };

    for handle in &handles {
        handle.unsubscribe();
    }
    session.disconnect();
    outcome
}
