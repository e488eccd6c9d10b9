//! `ChatSession`: the one object a UI holds.
//!
//! Wires the session manager, subscription controller, dispatcher, composer
//! and directory around a shared [`SessionContext`] and exposes their
//! operations.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::composer::Composer;
use crate::context::{SessionConfig, SessionContext, SessionEvent, SessionStatus};
use crate::directory::ConversationDirectory;
use crate::dispatch::{ChatSink, Dispatcher};
use crate::error::{ConnectError, SendError, SwitchError};
use crate::gateway::BackendGateway;
use crate::session::SessionManager;
use crate::subscription::{ActiveConversation, SubscriptionController};
use crate::transport::Transport;
use crate::types::{ChatAction, Conversation, ConversationId, Credentials, User};

pub struct ChatSession {
    ctx: Arc<SessionContext>,
    manager: SessionManager,
    subscriptions: Arc<SubscriptionController>,
    composer: Arc<Composer>,
    directory: ConversationDirectory,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        gateway: Arc<dyn BackendGateway>,
        sink: Arc<dyn ChatSink>,
        config: SessionConfig,
    ) -> Self {
        let ctx = Arc::new(SessionContext::new(transport, gateway, config));
        let subscriptions = Arc::new(SubscriptionController::new(ctx.clone()));
        let composer = Arc::new(Composer::new(ctx.clone(), subscriptions.clone()));
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone(), sink, subscriptions.routing()));
        let manager = SessionManager::new(
            ctx.clone(),
            subscriptions.clone(),
            composer.clone(),
            dispatcher,
        );
        let directory = ConversationDirectory::new(ctx.clone());
        Self {
            ctx,
            manager,
            subscriptions,
            composer,
            directory,
        }
    }

    pub async fn connect(&self, credentials: Credentials) -> Result<User, ConnectError> {
        self.manager.connect(credentials).await
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await
    }

    pub async fn switch_to(
        &self,
        conversation: ConversationId,
    ) -> Result<ActiveConversation, SwitchError> {
        self.subscriptions.switch_to(conversation).await
    }

    /// Remember `conversation`'s participants, then make it active.
    pub async fn select(
        &self,
        conversation: Conversation,
    ) -> Result<ActiveConversation, SwitchError> {
        let id = conversation.conversation_id.clone();
        self.directory.remember(conversation);
        self.subscriptions.switch_to(id).await
    }

    pub async fn send_chat(&self, content: &str) -> Result<ChatAction, SendError> {
        self.composer.send_chat(content).await
    }

    pub async fn send_broadcast(&self, content: &str) -> Result<ChatAction, SendError> {
        self.composer.send_broadcast(content).await
    }

    pub fn status(&self) -> SessionStatus {
        self.ctx.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.ctx.watch_status()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.ctx.subscribe_events()
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.subscriptions.active_conversation()
    }

    pub fn watch_active(&self) -> watch::Receiver<Option<ConversationId>> {
        self.subscriptions.watch_active()
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    #[cfg(test)]
    pub(crate) async fn settle_receipts(&self) {
        self.ctx.receipts.settle().await
    }
}
