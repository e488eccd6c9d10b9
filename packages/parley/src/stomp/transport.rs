//! STOMP-over-WebSocket implementation of the Transport Channel.
//!
//! One WebSocket per connection. A writer task owns the sink half and drains
//! an unbounded queue; a reader task owns the stream half, decodes frames and
//! routes `MESSAGE`s to the sink recorded for their `subscription` id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parley_session::{
    ActionKind, Credentials, EventSink, InboundFrame, Topic, TopicHandle, Transport,
    TransportError, TransportEvent,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::Frame;
use crate::config::{DestinationMap, StompConfig};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Refused/reset connections mean nothing is listening; everything else is
/// a protocol-level failure.
pub fn from_tungstenite(err: tungstenite::Error) -> TransportError {
    let is_connect = match &err {
        tungstenite::Error::Io(io_err) => matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    };
    if is_connect {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

/// Where each live subscription's frames go.
type Routes = Arc<RwLock<HashMap<String, (Topic, EventSink)>>>;

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    routes: Routes,
    closing: Arc<AtomicBool>,
    reader: CancellationToken,
}

pub struct StompTransport {
    ws_url: String,
    config: StompConfig,
    connection: Mutex<Option<Connection>>,
    next_subscription: AtomicU64,
}

impl StompTransport {
    pub fn new(ws_url: impl Into<String>, config: StompConfig) -> Self {
        Self {
            ws_url: ws_url.into(),
            config,
            connection: Mutex::new(None),
            next_subscription: AtomicU64::new(0),
        }
    }

    fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| TransportError::Protocol("connection state poisoned".into()))?;
        let connection = guard.as_ref().ok_or(TransportError::NotConnected)?;
        connection
            .outbound
            .send(Message::Text(frame.encode().into()))
            .map_err(|_| TransportError::Closed)
    }

    fn routes(&self) -> Result<Routes, TransportError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| TransportError::Protocol("connection state poisoned".into()))?;
        guard
            .as_ref()
            .map(|c| c.routes.clone())
            .ok_or(TransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.connection.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    /// Send CONNECT and wait for the broker's answer.
    async fn handshake(
        &self,
        ws: &mut WsStream,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        let connect = Frame::new("CONNECT")
            .with_header("accept-version", "1.2")
            .with_header("host", host_of(&self.ws_url))
            .with_header("heart-beat", "0,0")
            .with_header("Authorization", credentials.authorization());
        ws.send(Message::Text(connect.encode().into()))
            .await
            .map_err(from_tungstenite)?;

        let reply = tokio::time::timeout(self.config.connect_timeout, next_frame(ws))
            .await
            .map_err(|_| TransportError::Unreachable("timed out waiting for CONNECTED".into()))??;

        match reply.command.as_str() {
            "CONNECTED" => {
                debug!(version = ?reply.header("version"), "STOMP session established");
                Ok(())
            }
            "ERROR" => Err(TransportError::Rejected(error_reason(&reply))),
            other => Err(TransportError::Protocol(format!(
                "expected CONNECTED, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl Transport for StompTransport {
    async fn connect(
        &self,
        credentials: &Credentials,
        events: EventSink,
    ) -> Result<(), TransportError> {
        if self.is_connected() {
            debug!("already connected");
            return Ok(());
        }

        let (mut ws, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .map_err(from_tungstenite)?;
        self.handshake(&mut ws, credentials).await?;

        let (ws_write, ws_read) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let routes: Routes = Arc::new(RwLock::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));
        let reader = CancellationToken::new();

        tokio::spawn(write_loop(ws_write, outbound_rx));
        tokio::spawn(read_loop(
            ws_read,
            routes.clone(),
            events,
            closing.clone(),
            reader.clone(),
        ));

        let mut guard = self
            .connection
            .lock()
            .map_err(|_| TransportError::Protocol("connection state poisoned".into()))?;
        *guard = Some(Connection {
            outbound,
            routes,
            closing,
            reader,
        });
        info!(url = %self.ws_url, "connected");
        Ok(())
    }

    async fn publish(&self, topic: &Topic, payload: String) -> Result<(), TransportError> {
        let destination = send_destination(&self.config.destinations, topic, &payload)?;
        debug!(topic = %topic, destination = %destination, "SEND");
        self.send_frame(
            Frame::new("SEND")
                .with_header("destination", destination)
                .with_header("content-type", "application/json")
                .with_body(payload),
        )
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        sink: EventSink,
    ) -> Result<TopicHandle, TransportError> {
        let destination = subscribe_destination(&self.config.destinations, topic)?;
        let n = self.next_subscription.fetch_add(1, Ordering::SeqCst) + 1;
        let id = subscription_id(n);

        let routes = self.routes()?;
        if let Ok(mut routes) = routes.write() {
            routes.insert(id.clone(), (topic.clone(), sink));
        }

        let sent = self.send_frame(
            Frame::new("SUBSCRIBE")
                .with_header("id", id.clone())
                .with_header("destination", destination.clone())
                .with_header("ack", "auto"),
        );
        if let Err(e) = sent {
            if let Ok(mut routes) = routes.write() {
                routes.remove(&id);
            }
            return Err(e);
        }

        debug!(topic = %topic, destination = %destination, subscription = %id, "SUBSCRIBE");
        Ok(TopicHandle::new(n, topic.clone()))
    }

    async fn unsubscribe(&self, handle: TopicHandle) -> Result<(), TransportError> {
        let id = subscription_id(handle.id());
        let routes = self.routes()?;
        if let Ok(mut routes) = routes.write() {
            routes.remove(&id);
        }
        debug!(topic = %handle.topic(), subscription = %id, "UNSUBSCRIBE");
        self.send_frame(Frame::new("UNSUBSCRIBE").with_header("id", id))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| TransportError::Protocol("connection state poisoned".into()))?
            .take();
        let Some(connection) = connection else {
            return Ok(());
        };

        connection.closing.store(true, Ordering::SeqCst);
        connection.reader.cancel();
        // Dropping `outbound` after the DISCONNECT lets the writer flush and
        // close the socket.
        let _ = connection
            .outbound
            .send(Message::Text(Frame::new("DISCONNECT").encode().into()));
        info!("disconnected");
        Ok(())
    }
}

fn subscription_id(n: u64) -> String {
    format!("sub-{n}")
}

fn host_of(url: &str) -> &str {
    url.split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or_default()
}

fn error_reason(frame: &Frame) -> String {
    frame
        .header("message")
        .map(str::to_string)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| frame.body.trim().to_string())
}

#[derive(Deserialize)]
struct KindPeek {
    #[serde(rename = "type")]
    kind: ActionKind,
}

/// Presence and public chat share a topic but not a destination.
pub(crate) fn send_destination(
    map: &DestinationMap,
    topic: &Topic,
    payload: &str,
) -> Result<String, TransportError> {
    if topic.is_public() {
        let peek: KindPeek = serde_json::from_str(payload)
            .map_err(|e| TransportError::Protocol(format!("unroutable payload: {e}")))?;
        return Ok(if peek.kind.is_presence() {
            map.presence_send.clone()
        } else {
            map.public_send.clone()
        });
    }
    match topic.conversation_id() {
        Some(id) => Ok(format!("{}{}", map.private_send_prefix, id)),
        None => Err(TransportError::Protocol(format!("no destination for {topic}"))),
    }
}

pub(crate) fn subscribe_destination(
    map: &DestinationMap,
    topic: &Topic,
) -> Result<String, TransportError> {
    if topic.is_public() {
        return Ok(map.public_subscribe.clone());
    }
    match topic.conversation_id() {
        Some(id) => Ok(format!("{}{}", map.conversation_subscribe_prefix, id)),
        None => Err(TransportError::Protocol(format!("no destination for {topic}"))),
    }
}

/// Next non-heartbeat frame, for the handshake.
async fn next_frame(ws: &mut WsStream) -> Result<Frame, TransportError> {
    while let Some(msg) = ws.next().await {
        match msg.map_err(from_tungstenite)? {
            Message::Text(text) => {
                if let Some(frame) =
                    Frame::decode(&text).map_err(|e| TransportError::Protocol(e.to_string()))?
                {
                    return Ok(frame);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(TransportError::Closed)
}

async fn write_loop(
    mut ws_write: futures::stream::SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = ws_write.send(msg).await {
            debug!(error = %e, "websocket write failed");
            break;
        }
    }
    let _ = ws_write.close().await;
    debug!("writer stopped");
}

async fn read_loop(
    mut ws_read: futures::stream::SplitStream<WsStream>,
    routes: Routes,
    events: EventSink,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let reason = loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return,
            msg = ws_read.next() => msg,
        };

        let text = match msg {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|f| format!("websocket closed: {}", f.reason))
                    .unwrap_or_else(|| "websocket closed".to_string());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("websocket error: {e}"),
            None => break "websocket stream ended".to_string(),
        };

        let frame = match Frame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "undecodable STOMP frame, skipping");
                continue;
            }
        };

        match frame.command.as_str() {
            "MESSAGE" => route_message(&routes, frame),
            "ERROR" => break format!("broker error: {}", error_reason(&frame)),
            "RECEIPT" => {}
            other => debug!(command = other, "ignoring frame"),
        }
    };

    if !closing.load(Ordering::SeqCst) {
        warn!(reason = %reason, "connection lost");
        let _ = events.send(TransportEvent::Closed { reason });
    }
}

fn route_message(routes: &Routes, frame: Frame) {
    let Some(subscription) = frame.header("subscription") else {
        debug!("MESSAGE without subscription header, dropping");
        return;
    };
    let route = routes
        .read()
        .ok()
        .and_then(|r| r.get(subscription).cloned());
    match route {
        Some((topic, sink)) => {
            let _ = sink.send(TransportEvent::Frame(InboundFrame::new(topic, frame.body)));
        }
        None => debug!(subscription, "MESSAGE for unknown subscription, dropping"),
    }
}
