//! Backend Gateway port and the fire-and-forget read-receipt committer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::types::{Conversation, ConversationId, Credentials, MessagePage, User, UserId};

/// Request/response API for identity, conversations, history and read state.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn current_user(&self, credentials: &Credentials) -> Result<User, GatewayError>;

    async fn conversations(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Conversation>, GatewayError>;

    /// Get-or-create the 1:1 conversation with `user`.
    async fn conversation_for_user(
        &self,
        credentials: &Credentials,
        user: &UserId,
    ) -> Result<Conversation, GatewayError>;

    async fn messages(
        &self,
        credentials: &Credentials,
        conversation: &ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, GatewayError>;

    async fn mark_read(
        &self,
        credentials: &Credentials,
        conversation: &ConversationId,
    ) -> Result<(), GatewayError>;

    async fn unread_count(&self, credentials: &Credentials) -> Result<u64, GatewayError>;
}

/// Conversations the UI has shown the core, keyed by id.
pub(crate) type ConversationCache = Arc<RwLock<HashMap<ConversationId, Conversation>>>;

/// Commits read receipts in the background. Never retried, never surfaced:
/// a missed receipt is logged and messaging carries on.
pub(crate) struct ReadReceipts {
    gateway: Arc<dyn BackendGateway>,
    conversations: ConversationCache,
    tasks: TaskTracker,
}

impl ReadReceipts {
    pub fn new(gateway: Arc<dyn BackendGateway>, conversations: ConversationCache) -> Self {
        Self {
            gateway,
            conversations,
            tasks: TaskTracker::new(),
        }
    }

    /// Spawn a `mark_read` for `conversation` and return immediately.
    pub fn commit(&self, credentials: Credentials, conversation: ConversationId) {
        let gateway = self.gateway.clone();
        let conversations = self.conversations.clone();
        self.tasks.spawn(async move {
            match gateway.mark_read(&credentials, &conversation).await {
                Ok(()) => {
                    debug!(conversation = %conversation, "read receipt committed");
                    if let Ok(mut known) = conversations.write() {
                        if let Some(entry) = known.get_mut(&conversation) {
                            entry.unread_count = 0;
                        }
                    }
                }
                Err(e) => {
                    warn!(conversation = %conversation, error = %e, "read receipt commit failed");
                }
            }
        });
    }

    /// Wait for every receipt spawned so far.
    #[cfg(test)]
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
