//! Real-time push channel over WebSocket.
//!
//! A [`PushConnection`] owns a background task that reads JSON frames from
//! the socket and forwards parsed [`PushMessage`]s on an mpsc channel, and
//! writes outbound messages handed to it by the coordinator. The task ends
//! when the server closes the socket or an I/O error occurs; the receiver
//! then yields `None`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::client::HttpSyncClient;
use crate::error::{Result, SyncError};

/// Frames exchanged on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    /// Server notice that a newer snapshot of `data_type` exists.
    #[serde(rename = "sync:data:update", rename_all = "camelCase")]
    DataUpdate {
        data_type: String,
        #[serde(default)]
        data: Value,
        #[serde(default)]
        updated_at: Option<DateTime<Utc>>,
    },

    /// Client announcement of a freshly uploaded snapshot.
    #[serde(rename = "sync:data", rename_all = "camelCase")]
    DataPush { data_type: String, data: Value },

    #[serde(other)]
    Unknown,
}

/// A live push channel.
pub struct PushConnection {
    outbound: mpsc::Sender<PushMessage>,
    inbound: mpsc::Receiver<PushMessage>,
    task: JoinHandle<()>,
}

impl PushConnection {
    /// Connect to `url`, authenticating with `token` when given.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let mut request = url.into_client_request()?;
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SyncError::Push(format!("invalid token header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let (inbound_tx, inbound) = mpsc::channel(32);
        let (outbound, mut outbound_rx) = mpsc::channel::<PushMessage>(32);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = ws_stream.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<PushMessage>(&text) {
                                Ok(message) => {
                                    if inbound_tx.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => debug!(error = %e, "ignoring unparseable push frame"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("push channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "push channel read failed");
                            break;
                        }
                    },
                    message = outbound_rx.recv() => {
                        let Some(message) = message else { break };
                        match serde_json::to_string(&message) {
                            Ok(json) => {
                                if let Err(e) = ws_sink.send(WsMessage::Text(json)).await {
                                    warn!(error = %e, "push channel write failed");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "failed to encode push frame"),
                        }
                    }
                }
            }
        });

        info!(url, "push channel connected");
        Ok(Self {
            outbound,
            inbound,
            task,
        })
    }

    /// Sender for outbound frames.
    pub fn sender(&self) -> mpsc::Sender<PushMessage> {
        self.outbound.clone()
    }

    /// Queue a frame for sending.
    pub async fn send(&self, message: PushMessage) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| SyncError::Push("push channel closed".to_string()))
    }

    /// Next inbound frame, `None` once the channel has closed.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.inbound.recv().await
    }

    pub fn is_open(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Opens push connections for the coordinator.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self) -> Result<PushConnection>;
}

/// Connects to a fixed URL using the sync client's access token.
pub struct WsPushConnector {
    url: String,
    client: Arc<HttpSyncClient>,
}

impl WsPushConnector {
    pub fn new(url: impl Into<String>, client: Arc<HttpSyncClient>) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl PushConnector for WsPushConnector {
    async fn connect(&self) -> Result<PushConnection> {
        let token = self
            .client
            .access_token()
            .await?
            .ok_or(SyncError::NotConnected)?;
        PushConnection::connect(&self.url, Some(token.expose_secret())).await
    }
}
