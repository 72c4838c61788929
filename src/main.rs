//! Rin client - command-line front end
//!
//! Connects to the message server, prints every client event as a JSON line
//! and sends each line read from stdin. Commands: `/clear`, `/debug on|off`,
//! `/plan <json>`, `/read`, `/quit`.

use rin_core::{ActionPlan, ChatClient, ClientConfig, Database, DatabaseStorage, WebSocketTransport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rin_core=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;
    let storage = Arc::new(DatabaseStorage::new(db));

    let client = Arc::new(ChatClient::from_config(&config, storage));
    tracing::info!(
        conv_id = %client.conversation_id(),
        server = %config.server_url,
        messages = client.snapshot().len(),
        unread = client.unread_count(),
        "Client ready"
    );

    // Print events as they happen
    let mut events = client.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
            }
        }
    });

    client.restore_theme();
    client
        .open_session(WebSocketTransport::new(
            config.server_url.clone(),
            config.user_id.clone(),
        ))
        .await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => {}
            ("/quit", _) => break,
            ("/clear", _) => {
                client.request_clear().await;
            }
            ("/debug", arg) => client.set_debug_mode(arg.trim() == "on").await,
            ("/read", _) => {
                let newest = client
                    .snapshot()
                    .iter()
                    .filter_map(rin_core::Message::finite_timestamp)
                    .fold(0.0, f64::max);
                client.mark_read(newest);
            }
            ("/plan", json) => match ActionPlan::from_json(json) {
                Ok(plan) => {
                    let client = client.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.run_plan(plan).await {
                            tracing::warn!(error = %e, "Plan not started");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Invalid plan"),
            },
            _ => {
                client.send_text(line).await;
            }
        }
    }

    client.teardown().await;
    printer.abort();
    Ok(())
}
