//! Client adapter: a session store wired to a transport.
//!
//! [`QueueClient::start`] subscribes to the transport and spawns one
//! listener task that forwards, in arrival order:
//! - every decodable inbound message as [`SessionAction::EventReceived`],
//! - every connectivity change as [`SessionAction::ConnectionChanged`].
//!
//! Undecodable messages are logged and dropped. The action methods send the
//! matching command and report a rejection as [`ClientError::Rejected`].

use crate::config::{Config, ServiceTimes};
use crate::notification::Notification;
use crate::projections::{self, QueueStats};
use crate::protocol;
use crate::session::{SessionAction, SessionEnvironment, SessionError, SessionReducer, SessionState};
use crate::types::{SessionId, Ticket, TicketId, TicketKind};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use turnos_core::transport::{MessageStream, TransportError};
use turnos_runtime::{EffectHandle, Store, StoreError};

/// Store type driving one session
pub type SessionStore = Store<SessionState, SessionAction, SessionEnvironment, SessionReducer>;

/// Errors surfaced by [`QueueClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    /// The store refused the action
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The transport could not be subscribed to
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session controller rejected the command
    #[error("command rejected: {0}")]
    Rejected(#[from] SessionError),
}

/// A running queue client
pub struct QueueClient {
    store: SessionStore,
    listener: JoinHandle<()>,
    service_times: ServiceTimes,
}

impl QueueClient {
    /// Start a client for `session_id` on the environment's transport.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the transport subscription fails.
    pub async fn start(
        session_id: SessionId,
        environment: SessionEnvironment,
        config: &Config,
    ) -> Result<Self, ClientError> {
        let transport = std::sync::Arc::clone(&environment.transport);
        let state = SessionState::from_config(session_id.clone(), &config.session);
        let store = Store::new(state, SessionReducer::new(), environment);

        let messages = transport.subscribe().await?;
        let connection = transport.connection();
        let listener = tokio::spawn(listen(store.clone(), messages, connection));

        tracing::info!(%session_id, "Queue client started");
        Ok(Self {
            store,
            listener,
            service_times: config.service_times,
        })
    }

    // ========== Commands ==========

    /// Take a ticket of `kind`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if this session already holds a ticket.
    pub async fn request_ticket(&self, kind: TicketKind) -> Result<EffectHandle, ClientError> {
        self.command(SessionAction::RequestTicket { kind }).await
    }

    /// Call a waiting ticket
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if this session is not an operator or
    /// the ticket is not waiting.
    pub async fn call_ticket(&self, ticket_id: TicketId) -> Result<EffectHandle, ClientError> {
        self.command(SessionAction::CallTicket { ticket_id }).await
    }

    /// Start serving a called ticket
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if this session is not an operator or
    /// the ticket is not being called.
    pub async fn start_service(&self, ticket_id: TicketId) -> Result<EffectHandle, ClientError> {
        self.command(SessionAction::StartService { ticket_id }).await
    }

    /// Finish serving a ticket
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if the ticket is not in service.
    pub async fn complete_service(&self, ticket_id: TicketId) -> Result<EffectHandle, ClientError> {
        self.command(SessionAction::CompleteService { ticket_id }).await
    }

    /// Withdraw this session's ticket
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rejected`] if the ticket belongs to another
    /// session or is already in service.
    pub async fn cancel_ticket(&self, ticket_id: TicketId) -> Result<EffectHandle, ClientError> {
        self.command(SessionAction::CancelTicket { ticket_id }).await
    }

    /// Act as an operator of `kind`, or stop with `None`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Store`] if the client is shutting down.
    pub async fn set_operator(&self, kind: Option<TicketKind>) -> Result<(), ClientError> {
        self.store.send(SessionAction::SetOperator { kind }).await?;
        Ok(())
    }

    /// Hide the current notification
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Store`] if the client is shutting down.
    pub async fn dismiss_notification(&self) -> Result<(), ClientError> {
        self.store.send(SessionAction::DismissNotification).await?;
        Ok(())
    }

    async fn command(&self, action: SessionAction) -> Result<EffectHandle, ClientError> {
        let handle = self.store.send(action).await?;
        match self.store.state(|s| s.last_error.clone()).await {
            Some(error) => Err(ClientError::Rejected(error)),
            None => Ok(handle),
        }
    }

    // ========== Views ==========

    /// Copy of the whole session state
    pub async fn snapshot(&self) -> SessionState {
        self.store.state(Clone::clone).await
    }

    /// Active tickets in display order
    pub async fn queue(&self) -> Vec<Ticket> {
        self.store.state(|s| s.queue.tickets().to_vec()).await
    }

    /// Ticket held by this session
    pub async fn my_ticket(&self) -> Option<Ticket> {
        self.store.state(|s| s.my_ticket.clone()).await
    }

    /// 1-based position of this session's ticket among waiting tickets
    pub async fn my_position(&self) -> Option<usize> {
        self.store
            .state(|s| {
                s.my_ticket
                    .as_ref()
                    .and_then(|t| projections::position(&s.queue, &t.id))
            })
            .await
    }

    /// Expected wait for this session's ticket
    pub async fn my_estimated_wait(&self) -> Option<Duration> {
        let times = self.service_times;
        self.store
            .state(move |s| {
                s.my_ticket
                    .as_ref()
                    .and_then(|t| projections::estimated_wait(&s.queue, t, &times))
            })
            .await
    }

    /// Waiting tickets
    pub async fn waiting(&self) -> Vec<Ticket> {
        self.store
            .state(|s| projections::waiting(&s.queue).into_iter().cloned().collect())
            .await
    }

    /// Tickets being called
    pub async fn calling(&self) -> Vec<Ticket> {
        self.store
            .state(|s| projections::calling(&s.queue).into_iter().cloned().collect())
            .await
    }

    /// Tickets in service, by number
    pub async fn in_service(&self) -> Vec<Ticket> {
        self.store
            .state(|s| {
                TicketKind::ALL
                    .iter()
                    .flat_map(|kind| projections::in_service_for_kind(&s.queue, *kind))
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Counts per status
    pub async fn stats(&self) -> QueueStats {
        self.store.state(|s| projections::stats(&s.queue)).await
    }

    /// Notification currently shown
    pub async fn notification(&self) -> Option<Notification> {
        self.store.state(|s| s.notification.clone()).await
    }

    /// Whether the transport is connected
    pub async fn is_connected(&self) -> bool {
        self.store.state(|s| s.connected).await
    }

    /// Stop listening and wait for pending effects.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Store`] if effects are still running after `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ClientError> {
        self.listener.abort();
        self.store.shutdown(timeout).await?;
        Ok(())
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Forward transport traffic into the store until either side goes away
async fn listen(store: SessionStore, mut messages: MessageStream, mut connection: watch::Receiver<bool>) {
    let connected = *connection.borrow_and_update();
    if store
        .send(SessionAction::ConnectionChanged { connected })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            message = messages.next() => {
                let Some(message) = message else {
                    tracing::info!("Transport stream ended");
                    break;
                };
                let value = match message {
                    Ok(value) => value,
                    Err(error) => {
                        tracing::warn!(%error, "Transport stream error");
                        continue;
                    },
                };
                match protocol::decode(&value) {
                    Ok(event) => {
                        if store.send(SessionAction::EventReceived { event }).await.is_err() {
                            break;
                        }
                    },
                    Err(error) => {
                        tracing::debug!(%error, "Ignoring message");
                        metrics::counter!("turnos.messages.ignored").increment(1);
                    },
                }
            },
            changed = connection.changed() => {
                if changed.is_err() {
                    tracing::debug!("Connection status source closed");
                    break;
                }
                let connected = *connection.borrow_and_update();
                if store.send(SessionAction::ConnectionChanged { connected }).await.is_err() {
                    break;
                }
            },
        }
    }
}
