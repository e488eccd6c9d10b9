//! In-memory transport, gateway and sink for driving a `ChatSession` in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::client::ChatSession;
use crate::context::SessionConfig;
use crate::dispatch::ChatSink;
use crate::error::{GatewayError, TransportError};
use crate::gateway::BackendGateway;
use crate::transport::{EventSink, InboundFrame, Transport, TransportEvent};
use crate::types::{
    ChatAction, Conversation, ConversationId, Credentials, MessagePage, Topic, TopicHandle, User,
    UserId,
};

// ── Transport ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect(String),
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: String },
    Close,
}

/// Holds the next subscribe to one topic in flight until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct TransportState {
    ops: Vec<Op>,
    fail_connect: bool,
    fail_subscribes: usize,
    fail_topic: Option<String>,
    gates: HashMap<String, Arc<Gate>>,
    connection: Option<EventSink>,
    live: HashMap<u64, (Topic, EventSink)>,
}

#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
    next_handle: AtomicU64,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut TransportState) -> R) -> R {
        let mut state = self.state.lock().expect("transport state");
        f(&mut state)
    }

    pub fn fail_connect(&self) {
        self.with(|s| s.fail_connect = true);
    }

    /// Reject the next `n` subscribe calls, whatever the topic.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.with(|s| s.fail_subscribes = n);
    }

    /// Reject every subscribe to `topic`.
    pub fn fail_topic(&self, topic: &str) {
        self.with(|s| s.fail_topic = Some(topic.to_string()));
    }

    pub fn hold(&self, topic: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.with(|s| s.gates.insert(topic.to_string(), gate.clone()));
        gate
    }

    pub fn ops(&self) -> Vec<Op> {
        self.with(|s| s.ops.clone())
    }

    pub fn count(&self, matches: impl Fn(&Op) -> bool) -> usize {
        self.with(|s| s.ops.iter().filter(|op| matches(op)).count())
    }

    pub fn subscribes_to(&self, topic: &str) -> usize {
        self.count(|op| matches!(op, Op::Subscribe(t) if t == topic))
    }

    /// Published payloads, decoded.
    pub fn published(&self) -> Vec<(String, ChatAction)> {
        self.with(|s| {
            s.ops
                .iter()
                .filter_map(|op| match op {
                    Op::Publish { topic, payload } => Some((
                        topic.clone(),
                        serde_json::from_str(payload).expect("published payload is a ChatAction"),
                    )),
                    _ => None,
                })
                .collect()
        })
    }

    /// Topics with a live subscription, sorted.
    pub fn live_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> =
            self.with(|s| s.live.values().map(|(t, _)| t.to_string()).collect());
        topics.sort();
        topics
    }

    pub fn private_topics(&self) -> Vec<String> {
        self.live_topics()
            .into_iter()
            .filter(|t| t.starts_with("conversation."))
            .collect()
    }

    /// Deliver a frame as if it arrived on a live subscription. Returns
    /// false when nothing is subscribed to `topic`.
    pub fn deliver(&self, topic: &str, body: &str) -> bool {
        let sink = self.with(|s| {
            s.live
                .values()
                .find(|(t, _)| t.as_str() == topic)
                .map(|(_, sink)| sink.clone())
        });
        match sink {
            Some(sink) => sink
                .send(TransportEvent::Frame(InboundFrame::new(
                    Topic::from_wire(topic),
                    body,
                )))
                .is_ok(),
            None => false,
        }
    }

    /// Push a frame straight onto the connection's event stream, whether
    /// or not the topic is still subscribed (a frame already in flight).
    pub fn inject(&self, topic: &str, body: &str) {
        if let Some(sink) = self.with(|s| s.connection.clone()) {
            let _ = sink.send(TransportEvent::Frame(InboundFrame::new(
                Topic::from_wire(topic),
                body,
            )));
        }
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self, reason: &str) {
        if let Some(sink) = self.with(|s| s.connection.clone()) {
            let _ = sink.send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        credentials: &Credentials,
        events: EventSink,
    ) -> Result<(), TransportError> {
        self.with(|s| {
            s.ops.push(Op::Connect(credentials.token().to_string()));
            if s.fail_connect {
                return Err(TransportError::Unreachable("connection refused".into()));
            }
            s.connection = Some(events);
            Ok(())
        })
    }

    async fn publish(&self, topic: &Topic, payload: String) -> Result<(), TransportError> {
        self.with(|s| {
            if s.connection.is_none() {
                return Err(TransportError::NotConnected);
            }
            s.ops.push(Op::Publish {
                topic: topic.to_string(),
                payload,
            });
            Ok(())
        })
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        sink: EventSink,
    ) -> Result<TopicHandle, TransportError> {
        let gate = self.with(|s| {
            s.ops.push(Op::Subscribe(topic.to_string()));
            s.gates.remove(topic.as_str())
        });
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        self.with(|s| {
            if s.connection.is_none() {
                return Err(TransportError::NotConnected);
            }
            if s.fail_subscribes > 0 {
                s.fail_subscribes -= 1;
                return Err(TransportError::Rejected(format!("subscribe to {topic} refused")));
            }
            if s.fail_topic.as_deref() == Some(topic.as_str()) {
                return Err(TransportError::Rejected(format!("subscribe to {topic} refused")));
            }
            let id = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
            s.live.insert(id, (topic.clone(), sink));
            Ok(TopicHandle::new(id, topic.clone()))
        })
    }

    async fn unsubscribe(&self, handle: TopicHandle) -> Result<(), TransportError> {
        self.with(|s| {
            s.ops.push(Op::Unsubscribe(handle.topic().to_string()));
            s.live.remove(&handle.id());
            Ok(())
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.with(|s| {
            s.ops.push(Op::Close);
            s.connection = None;
            s.live.clear();
            Ok(())
        })
    }
}

// ── Gateway ────────────────────────────────────────────────────────────

#[derive(Default)]
struct GatewayState {
    fail_identity: bool,
    fail_mark_read: bool,
    identity_calls: usize,
    conversations: Vec<Conversation>,
    mark_read: Vec<ConversationId>,
    history: Vec<(ConversationId, u32, u32)>,
}

pub struct FakeGateway {
    user: User,
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn new(user: User) -> Arc<Self> {
        Arc::new(Self {
            user,
            state: Mutex::new(GatewayState::default()),
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut GatewayState) -> R) -> R {
        let mut state = self.state.lock().expect("gateway state");
        f(&mut state)
    }

    pub fn fail_identity(&self, fail: bool) {
        self.with(|s| s.fail_identity = fail);
    }

    pub fn fail_mark_read(&self) {
        self.with(|s| s.fail_mark_read = true);
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.with(|s| s.conversations.push(conversation));
    }

    pub fn identity_calls(&self) -> usize {
        self.with(|s| s.identity_calls)
    }

    pub fn mark_read_calls(&self) -> Vec<ConversationId> {
        self.with(|s| s.mark_read.clone())
    }

    pub fn history_calls(&self) -> Vec<(ConversationId, u32, u32)> {
        self.with(|s| s.history.clone())
    }
}

#[async_trait]
impl BackendGateway for FakeGateway {
    async fn current_user(&self, _credentials: &Credentials) -> Result<User, GatewayError> {
        self.with(|s| {
            s.identity_calls += 1;
            if s.fail_identity {
                Err(GatewayError::Unavailable)
            } else {
                Ok(self.user.clone())
            }
        })
    }

    async fn conversations(
        &self,
        _credentials: &Credentials,
    ) -> Result<Vec<Conversation>, GatewayError> {
        Ok(self.with(|s| s.conversations.clone()))
    }

    async fn conversation_for_user(
        &self,
        _credentials: &Credentials,
        user: &UserId,
    ) -> Result<Conversation, GatewayError> {
        self.with(|s| {
            s.conversations
                .iter()
                .find(|c| c.participants.iter().any(|p| &p.id == user))
                .cloned()
                .ok_or(GatewayError::Status {
                    status: 404,
                    message: format!("no user {user}"),
                })
        })
    }

    async fn messages(
        &self,
        _credentials: &Credentials,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, GatewayError> {
        self.with(|s| s.history.push((conversation.clone(), page, page_size)));
        Ok(MessagePage {
            messages: Vec::new(),
            current_page: page,
            total_items: 0,
            total_pages: 0,
        })
    }

    async fn mark_read(
        &self,
        _credentials: &Credentials,
        conversation: &ConversationId,
    ) -> Result<(), GatewayError> {
        self.with(|s| {
            s.mark_read.push(conversation.clone());
            if s.fail_mark_read {
                Err(GatewayError::Status {
                    status: 500,
                    message: "boom".into(),
                })
            } else {
                Ok(())
            }
        })
    }

    async fn unread_count(&self, _credentials: &Credentials) -> Result<u64, GatewayError> {
        Ok(self.with(|s| s.conversations.iter().map(|c| c.unread_count).sum()))
    }
}

// ── Sink ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Presence(String),
    Broadcast(ChatAction),
    Conversation(ChatAction),
}

pub struct RecordingSink {
    tx: mpsc::UnboundedSender<Seen>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl ChatSink for RecordingSink {
    fn presence(&self, notice: &str, _action: &ChatAction) {
        let _ = self.tx.send(Seen::Presence(notice.to_string()));
    }

    fn broadcast_message(&self, action: &ChatAction) {
        let _ = self.tx.send(Seen::Broadcast(action.clone()));
    }

    fn conversation_message(&self, action: &ChatAction) {
        let _ = self.tx.send(Seen::Conversation(action.clone()));
    }
}

/// Next thing the sink saw, failing the test after a second of silence.
pub async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("sink saw nothing within 1s")
        .expect("sink channel closed")
}

/// Let spawned tasks run up to their next await point.
pub async fn yield_a_few() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ── Fixtures ───────────────────────────────────────────────────────────

pub fn alice() -> User {
    User::new("1", "Alice")
}

pub fn bob() -> User {
    User::new("2", "Bob")
}

pub fn carol() -> User {
    User::new("3", "Carol")
}

pub fn token() -> Credentials {
    Credentials::bearer("test-token")
}

pub struct Harness {
    pub session: Arc<ChatSession>,
    pub transport: Arc<FakeTransport>,
    pub gateway: Arc<FakeGateway>,
    pub seen: mpsc::UnboundedReceiver<Seen>,
}

/// A session for Alice with 1:1 conversations "10" (Bob) and "20" (Carol)
/// and a group conversation "30" (Bob and Carol) known to the gateway.
pub fn harness() -> Harness {
    let transport = FakeTransport::new();
    let gateway = FakeGateway::new(alice());
    gateway.add_conversation(Conversation::new("10", vec![alice(), bob()]));
    gateway.add_conversation(Conversation::new("20", vec![alice(), carol()]));
    gateway.add_conversation(Conversation::new("30", vec![alice(), bob(), carol()]));
    let (sink, seen) = RecordingSink::new();
    let session = Arc::new(ChatSession::new(
        transport.clone(),
        gateway.clone(),
        sink,
        SessionConfig::default(),
    ));
    Harness {
        session,
        transport,
        gateway,
        seen,
    }
}

/// `harness()`, connected and with the gateway's conversations loaded.
pub async fn ready_harness() -> Harness {
    let h = harness();
    h.session.connect(token()).await.expect("connect");
    h.session
        .directory()
        .load_conversations()
        .await
        .expect("load conversations");
    h
}

pub fn chat_json(sender: &User, receiver: &User, conversation: &str, content: &str) -> String {
    serde_json::to_string(&ChatAction::chat(
        sender,
        &receiver.id,
        &ConversationId::new(conversation),
        content,
    ))
    .expect("serialize chat")
}
