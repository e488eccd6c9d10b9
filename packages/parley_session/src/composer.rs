//! Outbound composer: builds JOIN, LEAVE and CHAT actions and publishes them
//! once their preconditions hold. Stateless beyond what it reads from the
//! session and the subscription controller.

use std::sync::Arc;

use tracing::debug;

use crate::context::SessionContext;
use crate::error::{SendError, TransportError};
use crate::subscription::SubscriptionController;
use crate::types::{ChatAction, ConversationId, Topic, User, UserId};

pub struct Composer {
    ctx: Arc<SessionContext>,
    subscriptions: Arc<SubscriptionController>,
}

impl Composer {
    pub(crate) fn new(ctx: Arc<SessionContext>, subscriptions: Arc<SubscriptionController>) -> Self {
        Self { ctx, subscriptions }
    }

    /// Publish a CHAT to the active conversation.
    ///
    /// The active subscription is held for the whole send, so a concurrent
    /// `switch_to` cannot move the target between resolution and publish.
    pub async fn send_chat(&self, content: &str) -> Result<ChatAction, SendError> {
        let me = self.ready_identity()?;
        let active = self.subscriptions.lock().await;
        let subscription = active.as_ref().ok_or(SendError::NoActiveConversation)?;
        if content.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }

        let conversation = subscription.conversation_id.clone();
        let receiver = self.resolve_receiver(&me.id, &conversation)?;
        let action = ChatAction::chat(&me, &receiver, &conversation, content);

        self.publish(subscription.handle.topic(), &action)
            .await
            .map_err(SendError::Publish)?;
        debug!(conversation = %conversation, "chat published");
        Ok(action)
    }

    /// Publish a CHAT on the public topic.
    pub async fn send_broadcast(&self, content: &str) -> Result<ChatAction, SendError> {
        let me = self.ready_identity()?;
        if content.trim().is_empty() {
            return Err(SendError::EmptyContent);
        }
        let action = ChatAction::broadcast(&me, content);
        self.publish(&Topic::public(), &action)
            .await
            .map_err(SendError::Publish)?;
        Ok(action)
    }

    /// Announce presence. A no-op without a known identity.
    pub async fn send_join(&self) -> Result<(), TransportError> {
        match self.ctx.identity() {
            Some(me) => self.publish(&Topic::public(), &ChatAction::join(&me)).await,
            None => Ok(()),
        }
    }

    /// Announce departure. A no-op without a known identity.
    pub async fn send_leave(&self) -> Result<(), TransportError> {
        match self.ctx.identity() {
            Some(me) => self.publish(&Topic::public(), &ChatAction::leave(&me)).await,
            None => Ok(()),
        }
    }

    fn ready_identity(&self) -> Result<User, SendError> {
        let status = self.ctx.status();
        match (status.is_ready(), status.identity) {
            (true, Some(me)) => Ok(me),
            _ => Err(SendError::NotReady),
        }
    }

    /// The single participant who is not us.
    fn resolve_receiver(
        &self,
        me: &UserId,
        conversation: &ConversationId,
    ) -> Result<UserId, SendError> {
        let known = self
            .ctx
            .conversations
            .read()
            .map_err(|_| SendError::AmbiguousReceiver { counterparts: 0 })?;
        let counterparts: Vec<&User> = known
            .get(conversation)
            .map(|c| c.counterparts(me).collect())
            .unwrap_or_default();
        match counterparts.as_slice() {
            [only] => Ok(only.id.clone()),
            other => Err(SendError::AmbiguousReceiver {
                counterparts: other.len(),
            }),
        }
    }

    async fn publish(&self, topic: &Topic, action: &ChatAction) -> Result<(), TransportError> {
        let payload =
            serde_json::to_string(action).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.ctx.transport.publish(topic, payload).await
    }
}
