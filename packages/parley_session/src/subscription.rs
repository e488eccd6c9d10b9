//! Conversation subscription controller.
//!
//! Owns the single private-topic subscription. `switch_to` calls are
//! serialized on one async mutex (tokio's mutex is FIFO-fair), and every call
//! takes a ticket on entry; a call whose ticket is no longer the newest when
//! it gets the lock, or when its subscribe returns, backs out with
//! `Superseded`. The committed subscription therefore always matches the last
//! call issued, and no intermediate conversation is left subscribed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

use crate::context::SessionContext;
use crate::error::{SwitchError, TransportError};
use crate::transport::EventSink;
use crate::types::{ConversationId, Topic, TopicHandle};

/// The live private subscription. The handle never leaves the controller.
#[derive(Debug)]
pub(crate) struct ActiveSubscription {
    pub conversation_id: ConversationId,
    pub handle: TopicHandle,
}

impl ActiveSubscription {
    fn view(&self) -> ActiveConversation {
        ActiveConversation {
            conversation_id: self.conversation_id.clone(),
            topic: self.handle.topic().clone(),
        }
    }
}

/// What a successful `switch_to` established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConversation {
    pub conversation_id: ConversationId,
    pub topic: Topic,
}

pub struct SubscriptionController {
    ctx: Arc<SessionContext>,
    active: Mutex<Option<ActiveSubscription>>,
    issued: AtomicU64,
    /// Conversation whose frames the dispatcher should accept: the one
    /// subscribed, or being subscribed right now.
    routing: watch::Sender<Option<ConversationId>>,
    committed: watch::Sender<Option<ConversationId>>,
}

impl SubscriptionController {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        let (routing, _) = watch::channel(None);
        let (committed, _) = watch::channel(None);
        Self {
            ctx,
            active: Mutex::new(None),
            issued: AtomicU64::new(0),
            routing,
            committed,
        }
    }

    pub async fn switch_to(
        &self,
        conversation_id: ConversationId,
    ) -> Result<ActiveConversation, SwitchError> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let mut active = self.active.lock().await;

        if !self.ctx.is_ready() {
            return Err(SwitchError::NotReady);
        }
        let sink = self.ctx.link().ok_or(SwitchError::NotReady)?.events;

        if self.superseded(ticket) {
            debug!(conversation = %conversation_id, "switch overtaken before it started");
            return Err(SwitchError::Superseded);
        }

        if let Some(current) = active.as_ref() {
            if current.conversation_id == conversation_id {
                return Ok(current.view());
            }
        }

        if let Some(previous) = active.take() {
            self.committed.send_replace(None);
            self.routing.send_replace(None);
            self.release_handle(previous).await;
        }

        let topic = Topic::conversation(&conversation_id);
        self.routing.send_replace(Some(conversation_id.clone()));
        let handle = match self.subscribe_retrying(&topic, sink).await {
            Ok(handle) => handle,
            Err(e) => {
                self.routing.send_replace(None);
                warn!(conversation = %conversation_id, error = %e, "conversation subscribe failed");
                return Err(SwitchError::Subscription(e));
            }
        };

        if self.superseded(ticket) {
            debug!(conversation = %conversation_id, "switch overtaken while subscribing");
            self.routing.send_replace(None);
            if let Err(e) = self.ctx.transport.unsubscribe(handle).await {
                warn!(conversation = %conversation_id, error = %e, "unsubscribe of overtaken switch failed");
            }
            return Err(SwitchError::Superseded);
        }

        let subscription = ActiveSubscription {
            conversation_id: conversation_id.clone(),
            handle,
        };
        let view = subscription.view();
        *active = Some(subscription);
        self.committed.send_replace(Some(conversation_id.clone()));
        info!(conversation = %conversation_id, "active conversation switched");

        self.ctx.commit_read(conversation_id);
        Ok(view)
    }

    /// The committed conversation, if any.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.committed.borrow().clone()
    }

    pub fn watch_active(&self) -> watch::Receiver<Option<ConversationId>> {
        self.committed.subscribe()
    }

    pub(crate) fn routing(&self) -> watch::Receiver<Option<ConversationId>> {
        self.routing.subscribe()
    }

    /// Hold the committed subscription steady, e.g. for the span of a send.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<ActiveSubscription>> {
        self.active.lock().await
    }

    /// Drop the private subscription during disconnect or teardown.
    pub(crate) async fn release(&self) {
        let mut active = self.active.lock().await;
        self.committed.send_replace(None);
        self.routing.send_replace(None);
        if let Some(previous) = active.take() {
            self.release_handle(previous).await;
        }
    }

    fn superseded(&self, ticket: u64) -> bool {
        self.issued.load(Ordering::SeqCst) != ticket
    }

    async fn release_handle(&self, subscription: ActiveSubscription) {
        let conversation = subscription.conversation_id;
        match self.ctx.transport.unsubscribe(subscription.handle).await {
            Ok(()) => debug!(conversation = %conversation, "conversation unsubscribed"),
            Err(e) => warn!(conversation = %conversation, error = %e, "conversation unsubscribe failed"),
        }
    }

    /// One immediate retry, then give up.
    async fn subscribe_retrying(
        &self,
        topic: &Topic,
        sink: EventSink,
    ) -> Result<TopicHandle, TransportError> {
        match self.ctx.transport.subscribe(topic, sink.clone()).await {
            Ok(handle) => Ok(handle),
            Err(first) => {
                warn!(topic = %topic, error = %first, "subscribe rejected, retrying once");
                self.ctx.transport.subscribe(topic, sink).await
            }
        }
    }
}
