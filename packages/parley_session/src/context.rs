//! The explicit session object every component is handed.
//!
//! Holds the collaborators, the observable status, and the per-connection
//! values (credentials, event sink) that exist only while connected.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, watch};

use crate::gateway::{BackendGateway, ConversationCache, ReadReceipts};
use crate::transport::{EventSink, Transport};
use crate::types::{ConversationId, Credentials, User};

/// Tunables for the session core.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
    /// History page size used when the caller does not pass one.
    pub page_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Observable snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub identity: Option<User>,
}

impl SessionStatus {
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}

/// Lifecycle events emitted by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Ready(User),
    ConnectionError(String),
    IdentityUnavailable(String),
    Disconnected,
}

/// Values that only exist between a successful transport connect and teardown.
#[derive(Clone)]
pub(crate) struct Link {
    pub credentials: Credentials,
    pub events: EventSink,
}

pub(crate) struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub gateway: Arc<dyn BackendGateway>,
    pub config: SessionConfig,
    pub conversations: ConversationCache,
    pub receipts: ReadReceipts,
    status: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    link: RwLock<Option<Link>>,
}

impl SessionContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        gateway: Arc<dyn BackendGateway>,
        config: SessionConfig,
    ) -> Self {
        let conversations: ConversationCache = Arc::new(RwLock::new(HashMap::new()));
        let receipts = ReadReceipts::new(gateway.clone(), conversations.clone());
        let (status, _) = watch::channel(SessionStatus {
            state: ConnectionState::Disconnected,
            identity: None,
        });
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            gateway,
            config,
            conversations,
            receipts,
            status,
            events,
            link: RwLock::new(None),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().is_ready()
    }

    /// The local identity, only once resolved.
    pub fn identity(&self) -> Option<User> {
        self.status.borrow().identity.clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }

    pub fn set_identity(&self, identity: Option<User>) {
        self.status.send_modify(|s| s.identity = identity);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No receivers is fine; the UI may not be listening.
        let _ = self.events.send(event);
    }

    pub fn link(&self) -> Option<Link> {
        self.link.read().ok().and_then(|l| l.clone())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.link().map(|l| l.credentials)
    }

    pub fn set_link(&self, link: Option<Link>) {
        if let Ok(mut slot) = self.link.write() {
            *slot = link;
        }
    }

    /// Fire-and-forget read receipt, skipped when there is no live session.
    pub fn commit_read(&self, conversation: ConversationId) {
        match self.credentials() {
            Some(credentials) => self.receipts.commit(credentials, conversation),
            None => {
                tracing::debug!(conversation = %conversation, "no credentials, read receipt skipped")
            }
        }
    }
}
