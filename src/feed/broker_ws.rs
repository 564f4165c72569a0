//! Broker WebSocket feed adapter.
//!
//! The ingestion context: reads wire frames, parses them into raw messages,
//! normalizes, and enqueues onto the bridge. Nothing here blocks and nothing
//! here mutates account or position state.

use crate::error::{KeelError, Result};
use crate::services::{BridgeHandle, Normalizer};
use crate::types::RawMessage;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Broker feed WebSocket client.
#[derive(Clone)]
pub struct BrokerWs {
    url: String,
    normalizer: Arc<Normalizer>,
    bridge: BridgeHandle,
}

impl BrokerWs {
    /// Create a new feed client.
    pub fn new(url: String, normalizer: Arc<Normalizer>, bridge: BridgeHandle) -> Self {
        Self {
            url,
            normalizer,
            bridge,
        }
    }

    /// Connect and forward messages, reconnecting on failure.
    pub async fn connect(&self) -> Result<()> {
        loop {
            match self.run_connection().await {
                Ok(_) => {
                    warn!("Broker feed disconnected, reconnecting...");
                }
                Err(e) => {
                    error!("Broker feed error: {}, reconnecting...", e);
                }
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
        }
    }

    async fn run_connection(&self) -> Result<()> {
        info!("Connecting to broker feed at {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| KeelError::Feed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();
        info!("Connected to broker feed");

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    self.handle_frame(&text);
                }
                Ok(Message::Ping(data)) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    info!("Broker feed closed");
                    break;
                }
                Err(e) => {
                    error!("Broker feed read error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Parse, normalize, enqueue. Frames that are not wire messages are
    /// dropped with a diagnostic; unknown type codes are counted inside the
    /// normalizer.
    fn handle_frame(&self, text: &str) {
        let raw = match RawMessage::from_json(text) {
            Some(raw) => raw,
            None => {
                debug!("Ignoring non-message frame from broker feed");
                return;
            }
        };

        if let Some(event) = self.normalizer.normalize(&raw) {
            self.bridge.send(event);
        }
    }
}
