//! Session manager: connection lifecycle, identity bootstrap and the public
//! topic subscription.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Ready -> Disconnected
//!                      \-> Disconnected (connect failed)
//! ```
//!
//! Lifecycle operations are serialized on one mutex. While connected, a pump
//! task drains the transport's event stream into the dispatcher; a
//! transport-reported close tears the session down without reconnecting.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composer::Composer;
use crate::context::{ConnectionState, Link, SessionContext, SessionEvent};
use crate::dispatch::Dispatcher;
use crate::error::ConnectError;
use crate::subscription::SubscriptionController;
use crate::transport::{EventStream, TransportEvent};
use crate::types::{Credentials, Topic, TopicHandle, User};

/// Per-connection bookkeeping, guarded by the lifecycle lock.
#[derive(Default)]
struct Lifecycle {
    /// Bumped on every transport connect; stale pumps compare against it.
    epoch: u64,
    public: Option<TopicHandle>,
    pump: Option<CancellationToken>,
}

struct Shared {
    ctx: Arc<SessionContext>,
    subscriptions: Arc<SubscriptionController>,
    composer: Arc<Composer>,
    lifecycle: Mutex<Lifecycle>,
}

pub struct SessionManager {
    shared: Arc<Shared>,
    dispatcher: Arc<Dispatcher>,
}

impl SessionManager {
    pub(crate) fn new(
        ctx: Arc<SessionContext>,
        subscriptions: Arc<SubscriptionController>,
        composer: Arc<Composer>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                ctx,
                subscriptions,
                composer,
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
            dispatcher,
        }
    }

    /// Connect, subscribe the public topic, resolve identity, announce JOIN.
    ///
    /// Calling this while `Ready` returns the known identity without another
    /// JOIN. Calling it while `Connected` (identity previously unavailable)
    /// retries identity resolution on the existing connection.
    pub async fn connect(&self, credentials: Credentials) -> Result<User, ConnectError> {
        let shared = &self.shared;
        let mut lifecycle = shared.lifecycle.lock().await;

        let status = shared.ctx.status();
        match (status.state, status.identity) {
            (ConnectionState::Ready, Some(me)) => {
                debug!(user = %me.id, "connect while ready, nothing to do");
                return Ok(me);
            }
            (ConnectionState::Connected, _) | (ConnectionState::Ready, None) => {
                if let Some(mut link) = shared.ctx.link() {
                    link.credentials = credentials;
                    shared.ctx.set_link(Some(link));
                }
            }
            (ConnectionState::Disconnected | ConnectionState::Connecting, _) => {
                self.open(&mut lifecycle, credentials).await?;
            }
        }

        shared.ensure_public(&mut lifecycle).await?;
        shared.bootstrap_identity().await
    }

    /// Announce LEAVE (if identity is known), release every handle, close the
    /// transport. A no-op when already disconnected.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        let mut lifecycle = shared.lifecycle.lock().await;

        let state = shared.ctx.status().state;
        if state == ConnectionState::Disconnected {
            debug!("disconnect while disconnected, nothing to do");
            return;
        }

        if matches!(state, ConnectionState::Connected | ConnectionState::Ready) {
            if let Err(e) = shared.composer.send_leave().await {
                warn!(error = %e, "LEAVE publish failed");
            }
        }

        shared.teardown(&mut lifecycle).await;
        info!("disconnected");
    }

    async fn open(
        &self,
        lifecycle: &mut Lifecycle,
        credentials: Credentials,
    ) -> Result<(), ConnectError> {
        let ctx = &self.shared.ctx;
        ctx.set_state(ConnectionState::Connecting);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(e) = ctx.transport.connect(&credentials, events_tx.clone()).await {
            ctx.set_state(ConnectionState::Disconnected);
            let reason = e.to_string();
            warn!(error = %reason, "transport connect failed");
            ctx.emit(SessionEvent::ConnectionError(reason.clone()));
            return Err(ConnectError::Connection { reason });
        }

        lifecycle.epoch += 1;
        ctx.set_link(Some(Link {
            credentials,
            events: events_tx,
        }));
        ctx.set_state(ConnectionState::Connected);
        ctx.emit(SessionEvent::Connected);
        info!(epoch = lifecycle.epoch, "transport connected");

        let cancel = CancellationToken::new();
        lifecycle.pump = Some(cancel.clone());
        tokio::spawn(pump(
            events_rx,
            lifecycle.epoch,
            cancel,
            self.dispatcher.clone(),
            self.shared.clone(),
        ));
        Ok(())
    }
}

impl Shared {
    /// Subscribe the public topic unless already subscribed. Failure here
    /// leaves no usable session, so it tears the connection down.
    async fn ensure_public(&self, lifecycle: &mut Lifecycle) -> Result<(), ConnectError> {
        if lifecycle.public.is_some() {
            return Ok(());
        }

        let Some(link) = self.ctx.link() else {
            return Err(ConnectError::Connection {
                reason: "transport link missing".into(),
            });
        };

        match self.ctx.transport.subscribe(&Topic::public(), link.events).await {
            Ok(handle) => {
                debug!(topic = %handle.topic(), "public topic subscribed");
                lifecycle.public = Some(handle);
                Ok(())
            }
            Err(e) => {
                let reason = format!("public subscribe failed: {e}");
                warn!(error = %e, "public subscribe failed, closing connection");
                self.teardown(lifecycle).await;
                self.ctx.emit(SessionEvent::ConnectionError(reason.clone()));
                Err(ConnectError::Connection { reason })
            }
        }
    }

    async fn bootstrap_identity(&self) -> Result<User, ConnectError> {
        let ctx = &self.ctx;
        let me = match ctx.identity() {
            Some(me) => me,
            None => {
                let credentials = ctx.credentials().ok_or_else(|| ConnectError::Connection {
                    reason: "transport link missing".into(),
                })?;
                match ctx.gateway.current_user(&credentials).await {
                    Ok(me) => me,
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(error = %reason, "identity fetch failed, staying connected without JOIN");
                        ctx.emit(SessionEvent::IdentityUnavailable(reason.clone()));
                        return Err(ConnectError::IdentityUnavailable { reason });
                    }
                }
            }
        };

        ctx.set_identity(Some(me.clone()));
        if let Err(e) = self.composer.send_join().await {
            warn!(user = %me.id, error = %e, "JOIN publish failed");
        }
        ctx.set_state(ConnectionState::Ready);
        ctx.emit(SessionEvent::Ready(me.clone()));
        info!(user = %me.id, name = %me.display_name, "session ready");
        Ok(me)
    }

    /// Release every handle and close the transport. State flips to
    /// `Disconnected` first so no switch can slip in behind the release.
    async fn teardown(&self, lifecycle: &mut Lifecycle) {
        let ctx = &self.ctx;
        ctx.set_state(ConnectionState::Disconnected);
        ctx.set_link(None);

        self.subscriptions.release().await;
        if let Some(public) = lifecycle.public.take() {
            if let Err(e) = ctx.transport.unsubscribe(public).await {
                warn!(error = %e, "public unsubscribe failed");
            }
        }
        if let Err(e) = ctx.transport.close().await {
            warn!(error = %e, "transport close failed");
        }
        if let Some(pump) = lifecycle.pump.take() {
            pump.cancel();
        }

        ctx.set_identity(None);
        ctx.emit(SessionEvent::Disconnected);
    }

    /// The transport went away on its own. No LEAVE, no reconnect.
    async fn transport_closed(&self, epoch: u64, reason: &str) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.epoch != epoch || self.ctx.status().state == ConnectionState::Disconnected {
            debug!(epoch, "ignoring close from a previous connection");
            return;
        }
        warn!(reason, "transport closed by remote");
        self.teardown(&mut lifecycle).await;
    }
}

/// Drain transport events into the dispatcher, in order, until cancelled.
async fn pump(
    mut events: EventStream,
    epoch: u64,
    cancel: CancellationToken,
    dispatcher: Arc<Dispatcher>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(TransportEvent::Frame(frame)) => {
                    dispatcher.dispatch(&frame);
                }
                Some(TransportEvent::Closed { reason }) => {
                    shared.transport_closed(epoch, &reason).await;
                    break;
                }
                None => break,
            }
        }
    }
    debug!(epoch, "event pump stopped");
}
