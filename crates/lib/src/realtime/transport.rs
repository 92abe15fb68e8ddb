//! Text-message transport under the STOMP client.
//!
//! `Connector` opens a `Connection`; the default is a WebSocket via tokio-tungstenite. Tests
//! plug in in-memory connectors to play the broker side.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("stomp handshake failed: {0}")]
    Handshake(String),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("no data from broker for {0:?}")]
    HeartbeatTimeout(Duration),
}

/// One open connection carrying text messages in both directions.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    /// Next text message; `None` once the peer has closed the connection.
    /// Must be cancel safe: it is raced against outbound traffic and timers.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// WebSocket connector (`ws://`).
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        log::debug!("websocket open: {}", url);
        Ok(Box::new(WsConnection { ws }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => log::debug!("ignoring non-utf8 binary websocket message"),
                },
                Ok(Message::Close(frame)) => {
                    log::debug!("websocket closed by peer: {:?}", frame);
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            log::debug!("websocket close: {}", e);
        }
    }
}
