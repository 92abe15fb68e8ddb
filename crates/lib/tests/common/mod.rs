//! In-process STOMP broker over a real WebSocket on a free port.
//! Each accepted connection is handed to the test, which plays the broker side frame by frame.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use lib::realtime::{ClientOptions, Command, Frame, RealtimeEvent};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Broker {
    pub addr: SocketAddr,
    incoming: mpsc::UnboundedReceiver<BrokerConn>,
}

impl Broker {
    pub async fn start() -> Broker {
        let _ = env_logger::builder().is_test(true).try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker");
        let addr = listener.local_addr().expect("local_addr");
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let conn = BrokerConn {
                    ws,
                    subscriptions: HashMap::new(),
                    next_message: 0,
                };
                if tx.send(conn).is_err() {
                    break;
                }
            }
        });
        Broker { addr, incoming: rx }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws/websocket", self.addr)
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            url: self.url(),
            reconnect_delay: Duration::from_millis(50),
            heartbeat: (0, 0),
            token: None,
        }
    }

    /// Next client connection, already past the STOMP handshake.
    pub async fn accept(&mut self) -> BrokerConn {
        let mut conn = tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("client did not connect in time")
            .expect("broker stopped");
        let connect = conn.next_frame().await.expect("CONNECT frame");
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.get("accept-version"), Some("1.2"));
        conn.send(
            Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", "0,0"),
        )
        .await;
        conn
    }
}

pub struct BrokerConn {
    ws: WebSocketStream<TcpStream>,
    /// destination -> subscription id
    pub subscriptions: HashMap<String, String>,
    next_message: u64,
}

impl BrokerConn {
    pub async fn send(&mut self, frame: Frame) {
        self.ws
            .send(Message::Text(frame.encode()))
            .await
            .expect("broker send");
    }

    /// Next non-heartbeat frame; `None` once the client has gone away.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let msg = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame from client in time")?;
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            };
            if let Some(frame) = Frame::decode(&text).expect("client sent a valid frame") {
                return Some(frame);
            }
        }
    }

    /// Read SUBSCRIBE frames until `count` destinations are subscribed.
    pub async fn await_subscriptions(&mut self, count: usize) {
        while self.subscriptions.len() < count {
            let frame = self.next_frame().await.expect("client closed while subscribing");
            match frame.command {
                Command::Subscribe => {
                    let id = frame.get("id").expect("subscription id").to_string();
                    let dest = frame.get("destination").expect("destination").to_string();
                    self.subscriptions.insert(dest, id);
                }
                Command::Unsubscribe => {
                    let id = frame.get("id").unwrap_or_default().to_string();
                    self.subscriptions.retain(|_, v| *v != id);
                }
                other => panic!("unexpected {} while subscribing", other),
            }
        }
    }

    /// Deliver `body` to the client's subscription for `destination`.
    pub async fn publish(&mut self, destination: &str, body: &str) {
        let id = self
            .subscriptions
            .get(destination)
            .unwrap_or_else(|| panic!("client is not subscribed to {}", destination))
            .clone();
        self.next_message += 1;
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", id)
            .header("message-id", format!("m-{}", self.next_message))
            .header("content-type", "application/json")
            .with_body(body);
        self.send(frame).await;
    }

    pub async fn send_error(&mut self, message: &str) {
        self.send(
            Frame::new(Command::Error)
                .header("message", message)
                .with_body("broker failure"),
        )
        .await;
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Next event from the client, failing the test after [`WAIT`].
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<RealtimeEvent>) -> RealtimeEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no realtime event in time")
        .expect("event stream closed")
}
