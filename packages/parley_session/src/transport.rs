//! Transport Channel port: one bidirectional connection with named-topic
//! publish/subscribe.
//!
//! Implementations deliver everything they receive (frames on any subscribed
//! topic, and the closure of the connection itself) into a single
//! [`EventSink`] supplied by the session, so that frames reach the dispatcher
//! in receipt order.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{Credentials, Topic, TopicHandle};

/// A raw payload received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: Topic,
    pub body: String,
}

impl InboundFrame {
    pub fn new(topic: Topic, body: impl Into<String>) -> Self {
        Self {
            topic,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(InboundFrame),
    /// The connection ended without the session asking for it.
    Closed { reason: String },
}

pub type EventSink = mpsc::UnboundedSender<TransportEvent>;
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Abstract pub/sub connection. Only the session manager opens and closes it;
/// other components publish and subscribe through it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection, attaching `credentials` as connection metadata.
    /// Unsolicited closure is later reported on `events`.
    async fn connect(&self, credentials: &Credentials, events: EventSink)
    -> Result<(), TransportError>;

    async fn publish(&self, topic: &Topic, payload: String) -> Result<(), TransportError>;

    /// Start delivering frames for `topic` into `sink`.
    async fn subscribe(&self, topic: &Topic, sink: EventSink)
    -> Result<TopicHandle, TransportError>;

    async fn unsubscribe(&self, handle: TopicHandle) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
