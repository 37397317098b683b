//! Transport seam between the connection manager and the wire.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// One logical streaming connection. Implemented by the production
/// WebSocket transport and by channel-backed fakes in tests.
#[async_trait]
pub trait Transport: Send {
    /// Establish the connection, dropping any previous one.
    async fn connect(&mut self) -> Result<()>;

    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next inbound text frame. `Ok(None)` means the peer closed.
    async fn next_text(&mut self) -> Result<Option<String>>;

    /// Drop the connection, if any.
    async fn close(&mut self);
}

pub struct WsTransport {
    url: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    #[must_use]
    pub fn new(url: String) -> Self {
        Self { url, stream: None }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&mut self) -> Result<()> {
        self.stream = None;
        let url = url::Url::parse(&self.url)
            .map_err(|e| anyhow::anyhow!("invalid feed endpoint {}: {e}", self.url))?;
        tracing::debug!(url = %url, "Opening WebSocket connection");

        let (ws_stream, response) = connect_async(url.as_str()).await.map_err(|e| {
            tracing::error!(url = %self.url, error = %e, "WebSocket connection failed");
            anyhow::anyhow!("failed to connect to {}: {e}", self.url)
        })?;

        tracing::info!(url = %self.url, status = %response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("WebSocket not connected"))?;
        stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("WebSocket not connected"))?;

        while let Some(msg) = stream.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(text)),
                Message::Ping(payload) => {
                    stream.send(Message::Pong(payload)).await?;
                }
                Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {}
                Message::Close(_) => {
                    tracing::warn!(url = %self.url, "WebSocket closed by peer");
                    self.stream = None;
                    return Ok(None);
                }
            }
        }

        self.stream = None;
        Ok(None)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
