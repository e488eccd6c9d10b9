//! Conversation directory: the request/response side of the session.
//!
//! Lists and opens conversations through the backend, pages history, and
//! keeps the participant sets the composer needs to resolve a receiver.

use std::sync::Arc;

use tracing::debug;

use crate::context::SessionContext;
use crate::error::QueryError;
use crate::types::{Conversation, ConversationId, Credentials, MessagePage, UserId};

pub struct ConversationDirectory {
    ctx: Arc<SessionContext>,
}

impl ConversationDirectory {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Fetch the user's conversations and remember them.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>, QueryError> {
        let credentials = self.credentials()?;
        let conversations = self.ctx.gateway.conversations(&credentials).await?;
        debug!(count = conversations.len(), "conversations loaded");
        for conversation in &conversations {
            self.remember(conversation.clone());
        }
        Ok(conversations)
    }

    /// Get-or-create the conversation with `user` and remember it.
    pub async fn open_conversation_with(&self, user: &UserId) -> Result<Conversation, QueryError> {
        let credentials = self.credentials()?;
        let conversation = self
            .ctx
            .gateway
            .conversation_for_user(&credentials, user)
            .await?;
        self.remember(conversation.clone());
        Ok(conversation)
    }

    /// One page of history; `page_size` defaults to the configured size.
    pub async fn load_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        page_size: Option<u32>,
    ) -> Result<MessagePage, QueryError> {
        let credentials = self.credentials()?;
        let size = page_size.unwrap_or(self.ctx.config.page_size).max(1);
        Ok(self
            .ctx
            .gateway
            .messages(&credentials, conversation, page, size)
            .await?)
    }

    /// Total unread messages across all conversations.
    pub async fn unread_total(&self) -> Result<u64, QueryError> {
        let credentials = self.credentials()?;
        Ok(self.ctx.gateway.unread_count(&credentials).await?)
    }

    /// Record a conversation the UI obtained elsewhere.
    pub fn remember(&self, conversation: Conversation) {
        if let Ok(mut known) = self.ctx.conversations.write() {
            known.insert(conversation.conversation_id.clone(), conversation);
        }
    }

    pub fn get(&self, conversation: &ConversationId) -> Option<Conversation> {
        self.ctx
            .conversations
            .read()
            .ok()
            .and_then(|known| known.get(conversation).cloned())
    }

    /// Remembered conversations, ordered by id.
    pub fn known(&self) -> Vec<Conversation> {
        let mut all: Vec<Conversation> = self
            .ctx
            .conversations
            .read()
            .map(|known| known.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        all
    }

    fn credentials(&self) -> Result<Credentials, QueryError> {
        self.ctx.credentials().ok_or(QueryError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{alice, bob, harness, ready_harness};

    #[tokio::test]
    async fn queries_need_a_connection() {
        let h = harness();
        let err = h.session.directory().load_conversations().await.unwrap_err();
        assert!(matches!(err, QueryError::NotConnected));
    }

    #[tokio::test]
    async fn loaded_conversations_are_remembered_in_id_order() {
        let h = ready_harness().await;

        let ids: Vec<String> = h
            .session
            .directory()
            .known()
            .into_iter()
            .map(|c| c.conversation_id.to_string())
            .collect();

        assert_eq!(ids, ["10", "20", "30"]);
    }

    #[tokio::test]
    async fn open_conversation_with_remembers_the_result() {
        let h = ready_harness().await;
        let directory = h.session.directory();

        let conversation = directory.open_conversation_with(&bob().id).await.unwrap();

        assert_eq!(conversation.conversation_id, ConversationId::new("10"));
        assert_eq!(directory.get(&conversation.conversation_id), Some(conversation));
    }

    #[tokio::test]
    async fn history_uses_the_configured_page_size_by_default() {
        let h = ready_harness().await;
        let directory = h.session.directory();
        let conversation = ConversationId::new("10");

        directory.load_messages(&conversation, 0, None).await.unwrap();
        directory.load_messages(&conversation, 2, Some(5)).await.unwrap();

        assert_eq!(
            h.gateway.history_calls(),
            vec![(conversation.clone(), 0, 20), (conversation, 2, 5)]
        );
    }

    #[tokio::test]
    async fn successful_receipt_clears_the_cached_unread_count() {
        let h = ready_harness().await;
        let mut unread = Conversation::new("50", vec![alice(), bob()]);
        unread.unread_count = 4;
        h.session.directory().remember(unread);

        h.session.switch_to(ConversationId::new("50")).await.unwrap();
        h.session.settle_receipts().await;

        let cached = h.session.directory().get(&ConversationId::new("50")).unwrap();
        assert_eq!(cached.unread_count, 0);
    }

    #[tokio::test]
    async fn unread_total_sums_the_backend_count() {
        let h = ready_harness().await;
        assert_eq!(h.session.directory().unread_total().await.unwrap(), 0);
    }
}
