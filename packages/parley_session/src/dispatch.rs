//! Message dispatcher: classifies inbound frames and routes them to UI sinks.
//!
//! Frames are handled one at a time, synchronously, in the order the
//! transport delivered them. Only the read-receipt commit leaves this path,
//! and it does so without being awaited.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::context::SessionContext;
use crate::error::MalformedFrame;
use crate::transport::InboundFrame;
use crate::types::{ActionKind, ChatAction, ConversationId};

/// UI-facing handlers. Rendering is the implementor's business.
pub trait ChatSink: Send + Sync {
    /// A JOIN/LEAVE, with a human-readable notice.
    fn presence(&self, notice: &str, action: &ChatAction);

    /// CHAT received on the public topic.
    fn broadcast_message(&self, action: &ChatAction);

    /// CHAT received on the active conversation's topic.
    fn conversation_message(&self, action: &ChatAction);
}

/// Where a classified frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Presence,
    BroadcastChat,
    ConversationChat,
}

/// A frame that parsed, with its route decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub route: Route,
    pub action: ChatAction,
    /// Private topic the frame arrived on, if any.
    pub conversation: Option<ConversationId>,
}

/// Parse and route one frame. Presence wins over topic; chat is split by
/// whether it arrived on the public topic or a private one.
pub fn classify(frame: &InboundFrame) -> Result<Classified, MalformedFrame> {
    let action: ChatAction =
        serde_json::from_str(&frame.body).map_err(|e| MalformedFrame {
            topic: frame.topic.clone(),
            reason: e.to_string(),
        })?;

    let conversation = frame.topic.conversation_id();
    let route = match action.kind {
        ActionKind::Join | ActionKind::Leave => Route::Presence,
        ActionKind::Chat if frame.topic.is_public() => Route::BroadcastChat,
        ActionKind::Chat if conversation.is_some() => Route::ConversationChat,
        ActionKind::Chat => {
            return Err(MalformedFrame {
                topic: frame.topic.clone(),
                reason: "chat on a topic that is neither public nor a conversation".into(),
            });
        }
    };

    Ok(Classified {
        route,
        action,
        conversation,
    })
}

/// Human-readable presence notice.
pub fn presence_notice(action: &ChatAction) -> String {
    match action.kind {
        ActionKind::Join => format!("{} joined the chat", action.sender_name),
        ActionKind::Leave => format!("{} left the chat", action.sender_name),
        ActionKind::Chat => action.content_str().to_string(),
    }
}

pub struct Dispatcher {
    ctx: Arc<SessionContext>,
    sink: Arc<dyn ChatSink>,
    routing: watch::Receiver<Option<ConversationId>>,
}

impl Dispatcher {
    pub(crate) fn new(
        ctx: Arc<SessionContext>,
        sink: Arc<dyn ChatSink>,
        routing: watch::Receiver<Option<ConversationId>>,
    ) -> Self {
        Self { ctx, sink, routing }
    }

    /// Handle one frame. Returns the route taken, or `None` if the frame was
    /// dropped (malformed, or for a conversation no longer subscribed).
    pub fn dispatch(&self, frame: &InboundFrame) -> Option<Route> {
        let classified = match classify(frame) {
            Ok(c) => c,
            Err(e) => {
                warn!(topic = %e.topic, reason = %e.reason, "dropping malformed frame");
                return None;
            }
        };

        if let Some(conversation) = &classified.conversation {
            let accepting = self.routing.borrow().clone();
            if accepting.as_ref() != Some(conversation) {
                debug!(conversation = %conversation, "dropping frame from stale conversation topic");
                return None;
            }
        }

        let action = &classified.action;
        match classified.route {
            Route::Presence => {
                self.sink.presence(&presence_notice(action), action);
            }
            Route::BroadcastChat => {
                self.sink.broadcast_message(action);
            }
            Route::ConversationChat => {
                self.sink.conversation_message(action);
                self.acknowledge_if_addressed_to_me(action, classified.conversation);
            }
        }

        Some(classified.route)
    }

    /// Keep the recipient's unread count honest. The sender never commits a
    /// receipt for its own message.
    fn acknowledge_if_addressed_to_me(
        &self,
        action: &ChatAction,
        topic_conversation: Option<ConversationId>,
    ) {
        let Some(me) = self.ctx.identity() else {
            return;
        };
        if action.receiver_id.as_ref() != Some(&me.id) || action.sender_id == me.id {
            return;
        }
        if let Some(conversation) = action.conversation_id.clone().or(topic_conversation) {
            self.ctx.commit_read(conversation);
        }
    }
}
