//! Client-side messaging session core for Parley.
//!
//! A [`ChatSession`] owns one transport connection, the public broadcast
//! subscription and at most one private conversation subscription. Inbound
//! frames are classified and routed to a [`ChatSink`]; outbound actions are
//! validated before they are published.

pub mod client;
pub mod composer;
pub mod context;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod session;
pub mod subscription;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use client::ChatSession;
pub use context::{ConnectionState, SessionConfig, SessionEvent, SessionStatus};
pub use directory::ConversationDirectory;
pub use dispatch::{ChatSink, Classified, Route, classify, presence_notice};
pub use error::{
    ConnectError, GatewayError, MalformedFrame, QueryError, SendError, SwitchError, TransportError,
};
pub use gateway::BackendGateway;
pub use subscription::ActiveConversation;
pub use transport::{EventSink, EventStream, InboundFrame, Transport, TransportEvent};
pub use types::{
    ActionKind, ChatAction, Conversation, ConversationId, Credentials, MessagePage, Topic,
    TopicHandle, User, UserId,
};
