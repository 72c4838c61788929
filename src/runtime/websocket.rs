//! Websocket transport adapter
//!
//! Dials `<base>/api/ws/<conversation_id>?user_id=<user>` and bridges the
//! socket to a `Duplex` of text frames. One task writes, one task reads.

use super::traits::{ChannelEvent, Duplex, Transport, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

/// Production transport over `tokio-tungstenite`
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    base_url: String,
    user_id: String,
}

impl WebSocketTransport {
    /// `base_url` may use `ws(s)://` or `http(s)://`
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
        }
    }

    /// Websocket URL for one conversation
    pub fn endpoint(&self, conversation_id: &str) -> Result<String, TransportError> {
        let base = self.base_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            return Err(TransportError::InvalidEndpoint(format!(
                "server url must start with ws://, wss://, http:// or https://: {base}"
            )));
        };
        Ok(format!(
            "{base}/api/ws/{conversation_id}?user_id={}",
            self.user_id
        ))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, conversation_id: &str) -> Result<Duplex, TransportError> {
        let url = self.endpoint(conversation_id)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{url}: {e}")))?;
        tracing::debug!(url = %url, "Websocket connected");

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ChannelEvent>(INBOUND_BUFFER);

        // Writer: ends when every outbound sender is dropped
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = ws_writer.send(WsMessage::Text(text)).await {
                    tracing::debug!(error = %e, "Websocket send failed");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader: always finishes with `Closed`
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if inbound_tx.send(ChannelEvent::Frame(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = inbound_tx.send(ChannelEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(ChannelEvent::Closed).await;
        });

        Ok(Duplex {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
