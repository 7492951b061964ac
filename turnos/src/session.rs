//! Local session controller.
//!
//! One [`SessionState`] per client: the locally observed queue, the ticket
//! this session holds, the operator role it acts in, connection status,
//! the current notification and a log of recent activity.
//!
//! [`SessionReducer`] handles three families of [`SessionAction`]:
//! - commands issued by the user (request, call, start, complete, cancel),
//!   which are validated, applied optimistically where appropriate and
//!   broadcast to every peer,
//! - events received from the transport, which go through
//!   [`reduce_event`](crate::reducer::reduce_event),
//! - connection and timer signals.
//!
//! A rejected command never reaches the transport; the reason is kept in
//! [`SessionState::last_error`].

use crate::activity::ActivityLog;
use crate::config::SessionConfig;
use crate::identity::{RandomTicketIds, TicketIdGenerator};
use crate::notification::{Notification, NotificationKind};
use crate::protocol::{self, QueueEvent};
use crate::queue::Queue;
use crate::reducer::{self, OwnTicketChange};
use crate::types::{SessionId, Ticket, TicketId, TicketKind, TicketNumber, TicketStatus};
use std::sync::Arc;
use thiserror::Error;
use turnos_core::environment::Clock;
use turnos_core::transport::Transport;
use turnos_core::{SmallVec, async_effect, delay, effect::Effect, reducer::Reducer, smallvec};

type Effects = SmallVec<[Effect<SessionAction>; 4]>;

// ============================================================================
// State
// ============================================================================

/// Everything one client knows
#[derive(Clone, Debug)]
pub struct SessionState {
    /// Identity of this client
    pub session_id: SessionId,
    /// Locally observed queue
    pub queue: Queue,
    /// Ticket held by this session, if any
    pub my_ticket: Option<Ticket>,
    /// Operator role, if this client serves tickets
    pub operator: Option<TicketKind>,
    /// Whether the transport is connected
    pub connected: bool,
    /// Notification currently shown
    pub notification: Option<Notification>,
    /// Recent local activity
    pub activity: ActivityLog,
    /// Why the last command was rejected
    pub last_error: Option<SessionError>,
    /// The own ticket was requested offline and no peer has shown it back yet
    pub unannounced: bool,
    notification_seq: u64,
}

impl SessionState {
    /// Fresh, disconnected session with an empty queue
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            queue: Queue::new(),
            my_ticket: None,
            operator: None,
            connected: false,
            notification: None,
            activity: ActivityLog::default(),
            last_error: None,
            unannounced: false,
            notification_seq: 0,
        }
    }

    /// Fresh session sized by `config`
    #[must_use]
    pub fn from_config(session_id: SessionId, config: &SessionConfig) -> Self {
        Self {
            queue: Queue::with_retired_capacity(config.retired_capacity),
            activity: ActivityLog::with_capacity(config.activity_log_capacity),
            ..Self::new(session_id)
        }
    }

    /// Whether this session acts as an operator
    #[must_use]
    pub const fn is_operator(&self) -> bool {
        self.operator.is_some()
    }

    fn is_mine(&self, id: &TicketId) -> bool {
        self.my_ticket.as_ref().is_some_and(|t| &t.id == id)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Inputs to the session controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    // Commands
    /// Take a ticket of `kind`
    RequestTicket {
        /// Service category
        kind: TicketKind,
    },
    /// Claim a waiting ticket (operators only)
    CallTicket {
        /// Ticket to call
        ticket_id: TicketId,
    },
    /// Start serving a called ticket (operators only)
    StartService {
        /// Ticket to serve
        ticket_id: TicketId,
    },
    /// Finish serving a ticket (operators only)
    CompleteService {
        /// Ticket being served
        ticket_id: TicketId,
    },
    /// Withdraw the session's own ticket
    CancelTicket {
        /// Ticket to withdraw
        ticket_id: TicketId,
    },
    /// Act as an operator of `kind`, or stop acting as one
    SetOperator {
        /// Operator role
        kind: Option<TicketKind>,
    },
    /// Hide the current notification
    DismissNotification,

    // Signals
    /// An event arrived from the transport
    EventReceived {
        /// Decoded event
        event: QueueEvent,
    },
    /// Transport connectivity changed
    ConnectionChanged {
        /// New status
        connected: bool,
    },
    /// Auto-dismiss timer of notification `id` fired
    NotificationExpired {
        /// Generation id the timer was scheduled for
        id: u64,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Reasons a command is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Only one outstanding ticket per session
    #[error("ticket {number} is already active for this session")]
    TicketAlreadyActive {
        /// Number of the active ticket
        number: TicketNumber,
    },

    /// The command needs an operator role
    #[error("this session is not acting as an operator")]
    NotAnOperator,

    /// The ticket is not in the local queue
    #[error("ticket {0} is not in the queue")]
    UnknownTicket(TicketId),

    /// The ticket's status does not allow the command
    #[error("ticket {ticket_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Ticket involved
        ticket_id: TicketId,
        /// Its current status
        from: TicketStatus,
        /// Requested status
        to: TicketStatus,
    },

    /// Only the owner may cancel a ticket
    #[error("ticket {0} belongs to another session")]
    NotOwner(TicketId),

    /// The ticket is not being served
    #[error("ticket {0} is not in service")]
    NotInService(TicketId),
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the session controller
#[derive(Clone)]
pub struct SessionEnvironment {
    /// Timestamps for tickets, notifications and the activity log
    pub clock: Arc<dyn Clock>,
    /// Broadcast channel to every peer
    pub transport: Arc<dyn Transport>,
    /// Ids for newly requested tickets
    pub ticket_ids: Arc<dyn TicketIdGenerator>,
    /// Timing settings
    pub config: SessionConfig,
}

impl SessionEnvironment {
    /// Environment with random ticket ids
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self {
            clock,
            transport,
            ticket_ids: Arc::new(RandomTicketIds),
            config,
        }
    }

    /// Replace the ticket id source
    #[must_use]
    pub fn with_ticket_ids(mut self, ticket_ids: Arc<dyn TicketIdGenerator>) -> Self {
        self.ticket_ids = ticket_ids;
        self
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer driving one client session
#[derive(Clone, Debug, Default)]
pub struct SessionReducer;

impl SessionReducer {
    /// Creates a new `SessionReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn request_ticket(
        state: &mut SessionState,
        kind: TicketKind,
        env: &SessionEnvironment,
    ) -> Result<Effects, SessionError> {
        if let Some(ticket) = &state.my_ticket {
            return Err(SessionError::TicketAlreadyActive { number: ticket.number });
        }

        let ticket = Ticket::new(
            env.ticket_ids.next_id(),
            state.queue.next_number(),
            kind,
            state.session_id.clone(),
            env.clock.now(),
        );
        tracing::info!(
            session_id = %state.session_id,
            ticket = %ticket.id,
            number = %ticket.number,
            %kind,
            "Requesting ticket"
        );

        state.my_ticket = Some(ticket.clone());
        state.unannounced = !state.connected;
        Ok(Self::originate(state, QueueEvent::TicketCreated { ticket }, env))
    }

    fn call_ticket(
        state: &mut SessionState,
        ticket_id: TicketId,
        env: &SessionEnvironment,
    ) -> Result<Effects, SessionError> {
        let operator = state.operator.ok_or(SessionError::NotAnOperator)?;
        let ticket = Self::ready_for(state, &ticket_id, TicketStatus::Calling)?;

        tracing::info!(ticket = %ticket_id, number = %ticket.number, %operator, "Calling ticket");
        let event = QueueEvent::TicketCalling {
            ticket_id,
            number: ticket.number,
            operator,
            kind: ticket.kind,
        };
        Ok(Self::originate(state, event, env))
    }

    fn start_service(
        state: &mut SessionState,
        ticket_id: TicketId,
        env: &SessionEnvironment,
    ) -> Result<Effects, SessionError> {
        let operator = state.operator.ok_or(SessionError::NotAnOperator)?;
        let mut ticket = Self::ready_for(state, &ticket_id, TicketStatus::InService)?;
        ticket.status = TicketStatus::InService;
        ticket.assigned_operator = Some(operator);

        tracing::info!(ticket = %ticket_id, number = %ticket.number, %operator, "Starting service");
        let event = QueueEvent::TicketInService {
            ticket_id,
            ticket,
            operator,
        };
        Ok(Self::originate(state, event, env))
    }

    fn complete_service(
        state: &SessionState,
        ticket_id: TicketId,
        env: &SessionEnvironment,
    ) -> Result<Effects, SessionError> {
        if state.operator.is_none() {
            return Err(SessionError::NotAnOperator);
        }
        let number = state
            .queue
            .in_service()
            .get(&ticket_id)
            .map(|t| t.number)
            .ok_or_else(|| SessionError::NotInService(ticket_id.clone()))?;

        tracing::info!(ticket = %ticket_id, %number, "Completing service");
        Ok(smallvec![broadcast(env, QueueEvent::TicketServed { ticket_id, number })])
    }

    fn cancel_ticket(
        state: &SessionState,
        ticket_id: TicketId,
        env: &SessionEnvironment,
    ) -> Result<Effects, SessionError> {
        let ticket = state
            .queue
            .get(&ticket_id)
            .ok_or_else(|| SessionError::UnknownTicket(ticket_id.clone()))?;
        if !ticket.is_owned_by(&state.session_id) {
            return Err(SessionError::NotOwner(ticket_id));
        }
        if !ticket.status.can_transition_to(TicketStatus::Cancelled) {
            return Err(SessionError::InvalidTransition {
                ticket_id,
                from: ticket.status,
                to: TicketStatus::Cancelled,
            });
        }

        tracing::info!(ticket = %ticket_id, number = %ticket.number, "Cancelling ticket");
        Ok(smallvec![broadcast(env, QueueEvent::TicketCancelled { ticket_id })])
    }

    /// The ticket, if it exists locally and may move to `next`
    fn ready_for(
        state: &SessionState,
        ticket_id: &TicketId,
        next: TicketStatus,
    ) -> Result<Ticket, SessionError> {
        let ticket = state
            .queue
            .get(ticket_id)
            .ok_or_else(|| SessionError::UnknownTicket(ticket_id.clone()))?;
        if !ticket.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                ticket_id: ticket_id.clone(),
                from: ticket.status,
                to: next,
            });
        }
        Ok(ticket.clone())
    }

    /// Apply a locally originated event and broadcast it.
    ///
    /// The echo from the transport is then a duplicate and changes nothing.
    fn originate(state: &mut SessionState, event: QueueEvent, env: &SessionEnvironment) -> Effects {
        let mut effects = Self::apply(state, &event, env);
        effects.push(broadcast(env, event));
        effects
    }

    /// A peer showing the own ticket back means it was announced
    fn note_peer_knowledge(state: &mut SessionState, event: &QueueEvent) {
        let Some(mine) = &state.my_ticket else {
            return;
        };
        let known = match event {
            QueueEvent::SyncSnapshot { tickets } => tickets.iter().any(|t| t.id == mine.id),
            QueueEvent::TicketCreated { .. } | QueueEvent::SyncRequest { .. } => false,
            other => other.ticket_id() == Some(&mine.id),
        };
        if known {
            state.unannounced = false;
        }
    }

    /// Reduce an event into the queue and act on the outcome
    fn apply(state: &mut SessionState, event: &QueueEvent, env: &SessionEnvironment) -> Effects {
        let number = event
            .ticket_id()
            .and_then(|id| state.queue.get(id))
            .map(|t| t.number);
        let reduction = reducer::reduce_event(
            &mut state.queue,
            event,
            state.my_ticket.as_ref().map(|t| &t.id),
            &state.session_id,
        );

        let mut effects = Effects::new();

        if reduction.changed {
            Self::record_event(state, event, number, env);
        }

        match reduction.own_ticket {
            OwnTicketChange::Unchanged => {},
            OwnTicketChange::Updated(ticket) => {
                if state.my_ticket.is_none() {
                    tracing::info!(session_id = %state.session_id, ticket = %ticket.id, "Recognized own ticket");
                }
                state.my_ticket = Some(ticket);
            },
            OwnTicketChange::Removed => state.my_ticket = None,
            OwnTicketChange::MissingFromSnapshot => Self::missing_from_snapshot(state, env, &mut effects),
        }

        if let Some(kind) = reduction.notification {
            effects.push(Self::notify(state, kind, env));
        }

        if let Some(reply) = reduction.reply {
            tracing::debug!(tickets = state.queue.len(), "Answering sync request");
            effects.push(broadcast(env, reply));
        }

        effects
    }

    /// A snapshot left the own ticket out.
    ///
    /// A ticket no peer has seen yet is announced again. Otherwise peers
    /// removed it while this session was away, so it is dropped and retired.
    fn missing_from_snapshot(state: &mut SessionState, env: &SessionEnvironment, effects: &mut Effects) {
        let Some(ticket) = state.my_ticket.clone() else {
            return;
        };
        if state.unannounced {
            tracing::info!(ticket = %ticket.id, "Own ticket missing from snapshot, announcing it again");
            effects.push(broadcast(env, QueueEvent::TicketCreated { ticket }));
            return;
        }

        tracing::info!(ticket = %ticket.id, status = %ticket.status, "Own ticket left the queue while away");
        state.queue.retire(&ticket.id);
        state.my_ticket = None;
        state
            .activity
            .record(env.clock.now(), format!("Ticket {} left the queue", ticket.number));
    }

    fn record_event(
        state: &mut SessionState,
        event: &QueueEvent,
        number: Option<TicketNumber>,
        env: &SessionEnvironment,
    ) {
        let message = match event {
            QueueEvent::TicketCreated { ticket } if state.is_mine(&ticket.id) => {
                format!("Requested ticket {} ({})", ticket.number, ticket.kind)
            },
            QueueEvent::TicketCreated { ticket } => {
                format!("New ticket {} ({})", ticket.number, ticket.kind)
            },
            QueueEvent::TicketCalling { number, operator, .. } => {
                format!("Ticket {number} called by {operator}")
            },
            QueueEvent::TicketInService { ticket, .. } => format!("Ticket {} in service", ticket.number),
            QueueEvent::TicketServed { number, .. } => format!("Ticket {number} served"),
            QueueEvent::TicketCancelled { ticket_id } => match number {
                Some(number) => format!("Ticket {number} cancelled"),
                None => format!("Ticket {ticket_id} cancelled"),
            },
            QueueEvent::SyncSnapshot { .. } => {
                format!("Queue synchronized ({} tickets)", state.queue.len())
            },
            QueueEvent::SyncRequest { .. } => return,
        };
        state.activity.record(env.clock.now(), message);
    }

    fn notify(
        state: &mut SessionState,
        kind: NotificationKind,
        env: &SessionEnvironment,
    ) -> Effect<SessionAction> {
        state.notification_seq += 1;
        let id = state.notification_seq;
        tracing::info!(session_id = %state.session_id, notification = %kind, "Notifying");
        state.notification = Some(Notification {
            id,
            kind,
            raised_at: env.clock.now(),
        });

        delay! {
            duration: env.config.notification_timeout(),
            action: SessionAction::NotificationExpired { id }
        }
    }

    fn connection_changed(
        state: &mut SessionState,
        connected: bool,
        env: &SessionEnvironment,
    ) -> Effects {
        if state.connected == connected {
            return Effects::new();
        }
        state.connected = connected;

        if connected {
            tracing::info!(session_id = %state.session_id, "Connected, requesting sync");
            state.activity.record(env.clock.now(), "Connected");
            let mut effects: Effects = smallvec![broadcast(
                env,
                QueueEvent::SyncRequest {
                    session_id: state.session_id.clone(),
                }
            )];
            if let Some(ticket) = state.my_ticket.clone().filter(|_| state.unannounced) {
                tracing::info!(ticket = %ticket.id, "Announcing ticket requested offline");
                effects.push(broadcast(env, QueueEvent::TicketCreated { ticket }));
            }
            effects
        } else {
            tracing::warn!(session_id = %state.session_id, "Disconnected");
            state.activity.record(env.clock.now(), "Disconnected");
            Effects::new()
        }
    }

    /// Record the outcome of a command
    fn settle(state: &mut SessionState, result: Result<Effects, SessionError>) -> Effects {
        match result {
            Ok(effects) => {
                state.last_error = None;
                effects
            },
            Err(error) => {
                tracing::warn!(session_id = %state.session_id, %error, "Command rejected");
                state.last_error = Some(error);
                Effects::new()
            },
        }
    }
}

impl Reducer for SessionReducer {
    type State = SessionState;
    type Action = SessionAction;
    type Environment = SessionEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Commands ==========
            SessionAction::RequestTicket { kind } => {
                let result = Self::request_ticket(state, kind, env);
                Self::settle(state, result)
            },
            SessionAction::CallTicket { ticket_id } => {
                let result = Self::call_ticket(state, ticket_id, env);
                Self::settle(state, result)
            },
            SessionAction::StartService { ticket_id } => {
                let result = Self::start_service(state, ticket_id, env);
                Self::settle(state, result)
            },
            SessionAction::CompleteService { ticket_id } => {
                let result = Self::complete_service(state, ticket_id, env);
                Self::settle(state, result)
            },
            SessionAction::CancelTicket { ticket_id } => {
                let result = Self::cancel_ticket(state, ticket_id, env);
                Self::settle(state, result)
            },
            SessionAction::SetOperator { kind } => {
                state.operator = kind;
                state.last_error = None;
                let message = kind.map_or_else(
                    || "Operator role cleared".to_string(),
                    |kind| format!("Acting as {kind} operator"),
                );
                tracing::info!(session_id = %state.session_id, operator = ?kind, "Operator role changed");
                state.activity.record(env.clock.now(), message);
                Effects::new()
            },
            SessionAction::DismissNotification => {
                state.notification = None;
                Effects::new()
            },

            // ========== Signals ==========
            SessionAction::EventReceived { event } => {
                Self::note_peer_knowledge(state, &event);
                Self::apply(state, &event, env)
            },
            SessionAction::ConnectionChanged { connected } => {
                Self::connection_changed(state, connected, env)
            },
            SessionAction::NotificationExpired { id } => {
                // A dismissed or replaced notification has a different id
                if state.notification.as_ref().is_some_and(|n| n.id == id) {
                    state.notification = None;
                }
                Effects::new()
            },
        }
    }
}

/// Effect sending `event` to every peer.
///
/// A broadcast that fails (typically because the transport is disconnected)
/// is dropped: nothing is retried or queued.
fn broadcast(env: &SessionEnvironment, event: QueueEvent) -> Effect<SessionAction> {
    let transport = Arc::clone(&env.transport);
    async_effect! {
        let tipo = event.type_name();
        match protocol::encode(&event) {
            Ok(message) => match transport.broadcast(message).await {
                Ok(()) => tracing::debug!(tipo, "Broadcast sent"),
                Err(error) => {
                    tracing::warn!(tipo, %error, "Dropping broadcast");
                    metrics::counter!("turnos.broadcast.dropped", "tipo" => tipo).increment(1);
                },
            },
            Err(error) => tracing::error!(tipo, %error, "Failed to encode event"),
        }
        None
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use crate::identity::SequentialTicketIds;
    use chrono::Utc;
    use std::time::Duration;
    use turnos_testing::{RecordingTransport, ReducerTest, assertions, test_clock};

    fn me() -> SessionId {
        SessionId::new("user_me")
    }

    fn env_on(transport: &RecordingTransport) -> SessionEnvironment {
        SessionEnvironment::new(
            Arc::new(test_clock()),
            Arc::new(transport.clone()),
            SessionConfig::default(),
        )
        .with_ticket_ids(Arc::new(SequentialTicketIds::new("t")))
    }

    fn create_test_env() -> SessionEnvironment {
        env_on(&RecordingTransport::new())
    }

    fn holding(mine: &Ticket) -> SessionState {
        let mut state = state_with(vec![mine.clone()]);
        state.my_ticket = Some(mine.clone());
        state
    }

    fn received(event: QueueEvent) -> SessionAction {
        SessionAction::EventReceived { event }
    }

    fn ticket(id: &str, number: u32, owner: &str, status: TicketStatus) -> Ticket {
        let mut ticket = Ticket::new(
            TicketId::new(id),
            TicketNumber::new(number),
            TicketKind::Teller,
            SessionId::new(owner),
            Utc::now(),
        );
        ticket.status = status;
        ticket
    }

    fn state_with(tickets: Vec<Ticket>) -> SessionState {
        let mut state = SessionState::new(me());
        state.queue = Queue::from_tickets(tickets);
        state.connected = true;
        state
    }

    fn operator_state(tickets: Vec<Ticket>) -> SessionState {
        let mut state = state_with(tickets);
        state.operator = Some(TicketKind::Teller);
        state
    }

    // ========================================================================
    // Requesting
    // ========================================================================

    #[test]
    fn test_request_ticket_applies_and_broadcasts() {
        let transport = RecordingTransport::new();
        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(state_with(vec![ticket("other", 4, "user_x", TicketStatus::Waiting)]))
            .when_action(SessionAction::RequestTicket { kind: TicketKind::Teller })
            .then_state(|state| {
                let mine = state.my_ticket.as_ref().unwrap();
                assert_eq!(mine.id, TicketId::new("t_1"));
                assert_eq!(mine.number, TicketNumber::new(5));
                assert_eq!(mine.owner_session, me());
                assert_eq!(mine.status, TicketStatus::Waiting);
                assert!(state.queue.contains(&mine.id));
                assert_eq!(state.activity.latest().unwrap().message, "Requested ticket #5 (teller)");
                assert_eq!(state.last_error, None);
                assert!(!state.unannounced);
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["nuevo_turno"]);
                let QueueEvent::TicketCreated { ticket } = protocol::decode(&sent[0]).unwrap() else {
                    panic!("expected nuevo_turno");
                };
                assert_eq!(ticket.number, TicketNumber::new(5));
                assert_eq!(ticket.owner_session, me());
            })
            .run();
    }

    #[test]
    fn test_request_while_offline_is_marked_unannounced() {
        let transport = RecordingTransport::disconnected();
        let mut state = state_with(vec![]);
        state.connected = false;

        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(state)
            .when_action(SessionAction::RequestTicket { kind: TicketKind::Teller })
            .then_state(|state| {
                assert!(state.unannounced);
                assert!(state.my_ticket.is_some());
            })
            .then_broadcasts(&transport, |sent| assert!(sent.is_empty()))
            .run();
    }

    #[test]
    fn test_request_ticket_rejected_while_one_is_active() {
        let mut state = state_with(vec![]);
        state.my_ticket = Some(ticket("mine", 2, "user_me", TicketStatus::Waiting));

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state)
            .when_action(SessionAction::RequestTicket { kind: TicketKind::Executive })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(SessionError::TicketAlreadyActive { number: TicketNumber::new(2) })
                );
                assert!(state.queue.is_empty());
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    #[test]
    fn test_call_ticket_requires_operator_role() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![ticket("a", 1, "user_x", TicketStatus::Waiting)]))
            .when_action(SessionAction::CallTicket { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                assert_eq!(state.last_error, Some(SessionError::NotAnOperator));
                assert_eq!(state.queue.tickets()[0].status, TicketStatus::Waiting);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_call_ticket_applies_optimistically() {
        let transport = RecordingTransport::new();
        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(operator_state(vec![ticket("a", 1, "user_x", TicketStatus::Waiting)]))
            .when_action(SessionAction::CallTicket { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                let called = &state.queue.tickets()[0];
                assert_eq!(called.status, TicketStatus::Calling);
                assert_eq!(called.assigned_operator, Some(TicketKind::Teller));
                assert_eq!(state.activity.latest().unwrap().message, "Ticket #1 called by teller");
            })
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["turno_llamando"]);
                assert_eq!(sent[0]["turnoId"], "a");
            })
            .run();
    }

    #[test]
    fn test_call_unknown_ticket_is_rejected() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(operator_state(vec![]))
            .when_action(SessionAction::CallTicket { ticket_id: TicketId::new("ghost") })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(SessionError::UnknownTicket(TicketId::new("ghost")))
                );
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_start_service_requires_calling_status() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(operator_state(vec![ticket("a", 1, "user_x", TicketStatus::Waiting)]))
            .when_action(SessionAction::StartService { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                assert_eq!(
                    state.last_error,
                    Some(SessionError::InvalidTransition {
                        ticket_id: TicketId::new("a"),
                        from: TicketStatus::Waiting,
                        to: TicketStatus::InService,
                    })
                );
            })
            .run();
    }

    #[test]
    fn test_start_service_updates_in_service_index() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(operator_state(vec![ticket("a", 1, "user_x", TicketStatus::Calling)]))
            .when_action(SessionAction::StartService { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                let serving = state.queue.in_service().get(&TicketId::new("a")).unwrap();
                assert_eq!(serving.status, TicketStatus::InService);
                assert_eq!(serving.assigned_operator, Some(TicketKind::Teller));
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .run();
    }

    #[test]
    fn test_complete_service_broadcasts_without_local_change() {
        let transport = RecordingTransport::new();
        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(operator_state(vec![ticket("a", 1, "user_x", TicketStatus::InService)]))
            .when_action(SessionAction::CompleteService { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                assert_eq!(state.last_error, None);
                assert!(state.queue.contains(&TicketId::new("a")));
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["turno_atendido"]);
            })
            .run();
    }

    #[test]
    fn test_complete_service_requires_ticket_in_service() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(operator_state(vec![ticket("a", 1, "user_x", TicketStatus::Calling)]))
            .when_action(SessionAction::CompleteService { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                assert_eq!(state.last_error, Some(SessionError::NotInService(TicketId::new("a"))));
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    // ========================================================================
    // Cancelling
    // ========================================================================

    #[test]
    fn test_cancel_own_ticket_broadcasts() {
        let transport = RecordingTransport::new();
        let mine = ticket("mine", 1, "user_me", TicketStatus::Calling);

        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(holding(&mine))
            .when_action(SessionAction::CancelTicket { ticket_id: TicketId::new("mine") })
            .then_state(|state| {
                assert_eq!(state.last_error, None);
                assert!(state.my_ticket.is_some());
            })
            .then_effects(|effects| assertions::assert_has_future_effect(effects))
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["turno_cancelado"]);
            })
            .run();
    }

    #[test]
    fn test_cancel_foreign_ticket_is_rejected() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![ticket("a", 1, "user_x", TicketStatus::Waiting)]))
            .when_action(SessionAction::CancelTicket { ticket_id: TicketId::new("a") })
            .then_state(|state| {
                assert_eq!(state.last_error, Some(SessionError::NotOwner(TicketId::new("a"))));
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_cancel_in_service_ticket_is_rejected() {
        let mine = ticket("mine", 1, "user_me", TicketStatus::InService);
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![mine]))
            .when_action(SessionAction::CancelTicket { ticket_id: TicketId::new("mine") })
            .then_state(|state| {
                assert!(matches!(
                    state.last_error,
                    Some(SessionError::InvalidTransition { to: TicketStatus::Cancelled, .. })
                ));
            })
            .run();
    }

    // ========================================================================
    // Received events
    // ========================================================================

    #[test]
    fn test_calling_own_ticket_notifies_and_schedules_expiry() {
        let mine = ticket("mine", 3, "user_me", TicketStatus::Waiting);

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(holding(&mine))
            .when_action(SessionAction::EventReceived {
                event: QueueEvent::TicketCalling {
                    ticket_id: TicketId::new("mine"),
                    number: TicketNumber::new(3),
                    operator: TicketKind::Teller,
                    kind: TicketKind::Teller,
                },
            })
            .then_state(|state| {
                assert_eq!(state.my_ticket.as_ref().unwrap().status, TicketStatus::Calling);
                let notification = state.notification.as_ref().unwrap();
                assert_eq!(notification.id, 1);
                assert_eq!(
                    notification.kind,
                    NotificationKind::Calling {
                        number: TicketNumber::new(3),
                        operator: TicketKind::Teller,
                    }
                );
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assert_eq!(
                    assertions::delayed_actions(effects),
                    vec![(Duration::from_secs(5), &SessionAction::NotificationExpired { id: 1 })]
                );
            })
            .run();
    }

    #[test]
    fn test_served_own_ticket_clears_it() {
        let mine = ticket("mine", 3, "user_me", TicketStatus::InService);

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(holding(&mine))
            .when_action(SessionAction::EventReceived {
                event: QueueEvent::TicketServed {
                    ticket_id: TicketId::new("mine"),
                    number: TicketNumber::new(3),
                },
            })
            .then_state(|state| {
                assert!(state.my_ticket.is_none());
                assert!(state.queue.is_empty());
                assert_eq!(
                    state.notification.as_ref().unwrap().kind,
                    NotificationKind::Served { number: TicketNumber::new(3) }
                );
            })
            .then_effects(|effects| assert_eq!(assertions::delayed_actions(effects).len(), 1))
            .run();
    }

    #[test]
    fn test_cancelled_ticket_is_logged_by_number() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![ticket("a", 4, "user_x", TicketStatus::Waiting)]))
            .when_action(received(QueueEvent::TicketCancelled { ticket_id: TicketId::new("a") }))
            .then_state(|state| {
                assert!(state.queue.is_empty());
                assert_eq!(state.activity.latest().unwrap().message, "Ticket #4 cancelled");
            })
            .run();
    }

    #[test]
    fn test_peer_sync_request_is_answered() {
        let transport = RecordingTransport::new();
        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(state_with(vec![ticket("a", 1, "user_x", TicketStatus::Waiting)]))
            .when_action(SessionAction::EventReceived {
                event: QueueEvent::SyncRequest { session_id: SessionId::new("user_new") },
            })
            .then_effects(|effects| assertions::assert_effects_count(effects, 1))
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["sync_cola"]);
                assert_eq!(sent[0]["cola"][0]["id"], "a");
            })
            .run();
    }

    #[test]
    fn test_snapshot_without_unannounced_ticket_announces_it_again() {
        let transport = RecordingTransport::new();
        let mine = ticket("mine", 1, "user_me", TicketStatus::Waiting);
        let mut state = holding(&mine);
        state.unannounced = true;

        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(state)
            .when_action(SessionAction::EventReceived {
                event: QueueEvent::SyncSnapshot {
                    tickets: vec![ticket("other", 1, "user_x", TicketStatus::Waiting)],
                },
            })
            .then_state(move |state| {
                assert_eq!(state.my_ticket, Some(mine));
                assert_eq!(state.queue.len(), 1);
                assert!(state.unannounced);
            })
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["nuevo_turno"]);
            })
            .run();
    }

    #[test]
    fn test_snapshot_without_announced_ticket_drops_it() {
        let transport = RecordingTransport::new();
        let mine = ticket("mine", 1, "user_me", TicketStatus::InService);

        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(holding(&mine))
            .when_action(received(QueueEvent::SyncSnapshot {
                tickets: vec![ticket("other", 2, "user_x", TicketStatus::Waiting)],
            }))
            .then_state(|state| {
                assert_eq!(state.my_ticket, None);
                assert_eq!(state.queue.len(), 1);
                assert!(state.queue.is_retired(&TicketId::new("mine")));
                assert!(state.queue.in_service().is_empty());
                assert_eq!(state.activity.latest().unwrap().message, "Ticket #1 left the queue");
            })
            .then_broadcasts(&transport, |sent| assert!(sent.is_empty()))
            .run();
    }

    #[test]
    fn test_dropped_ticket_echo_does_not_return() {
        let mine = ticket("mine", 1, "user_me", TicketStatus::InService);
        let snapshot = QueueEvent::SyncSnapshot {
            tickets: vec![ticket("other", 2, "user_x", TicketStatus::Waiting)],
        };

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(holding(&mine))
            .given_actions([received(snapshot)])
            .when_action(received(QueueEvent::TicketCreated { ticket: mine.clone() }))
            .then_state(|state| {
                assert_eq!(state.my_ticket, None);
                assert_eq!(state.queue.len(), 1);
            })
            .run();
    }

    #[test]
    fn test_peer_event_confirms_unannounced_ticket() {
        let mine = ticket("mine", 2, "user_me", TicketStatus::Waiting);
        let mut state = holding(&mine);
        state.unannounced = true;

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state)
            .when_action(received(QueueEvent::TicketCalling {
                ticket_id: mine.id.clone(),
                number: mine.number,
                operator: TicketKind::Teller,
                kind: TicketKind::Teller,
            }))
            .then_state(|state| assert!(!state.unannounced))
            .run();
    }

    #[test]
    fn test_own_echo_does_not_confirm_unannounced_ticket() {
        let mine = ticket("mine", 2, "user_me", TicketStatus::Waiting);
        let mut state = holding(&mine);
        state.unannounced = true;

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state)
            .when_action(received(QueueEvent::TicketCreated { ticket: mine.clone() }))
            .then_state(|state| assert!(state.unannounced))
            .run();
    }

    #[test]
    fn test_restarted_session_adopts_ticket_from_snapshot() {
        let held = ticket("held", 2, "user_me", TicketStatus::Waiting);

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![]))
            .given_actions([received(QueueEvent::SyncSnapshot {
                tickets: vec![ticket("a", 1, "user_x", TicketStatus::Waiting), held.clone()],
            })])
            .when_action(SessionAction::RequestTicket { kind: TicketKind::Teller })
            .then_state(move |state| {
                assert_eq!(state.my_ticket, Some(held));
                assert_eq!(
                    state.last_error,
                    Some(SessionError::TicketAlreadyActive { number: TicketNumber::new(2) })
                );
                assert_eq!(state.queue.len(), 2);
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_restarted_session_is_notified_for_adopted_ticket() {
        let held = ticket("held", 2, "user_me", TicketStatus::Waiting);

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![held.clone()]))
            .when_action(received(QueueEvent::TicketCalling {
                ticket_id: held.id.clone(),
                number: held.number,
                operator: TicketKind::Executive,
                kind: TicketKind::Teller,
            }))
            .then_state(|state| {
                assert_eq!(state.my_ticket.as_ref().unwrap().status, TicketStatus::Calling);
                assert!(matches!(
                    state.notification.as_ref().unwrap().kind,
                    NotificationKind::Calling { operator: TicketKind::Executive, .. }
                ));
            })
            .run();
    }

    // ========================================================================
    // Connection and notifications
    // ========================================================================

    #[test]
    fn test_connecting_announces_offline_request() {
        let transport = RecordingTransport::new();
        let mine = ticket("mine", 3, "user_me", TicketStatus::Waiting);
        let mut state = holding(&mine);
        state.connected = false;
        state.unannounced = true;

        ReducerTest::new(SessionReducer::new())
            .with_env(env_on(&transport))
            .given_state(state)
            .when_action(SessionAction::ConnectionChanged { connected: true })
            .then_broadcasts(&transport, |sent| {
                assert_eq!(assertions::message_types(sent), vec!["sync_request", "nuevo_turno"]);
            })
            .run();
    }

    #[test]
    fn test_connecting_requests_sync_once() {
        let mut state = SessionState::new(me());
        let env = create_test_env();
        let reducer = SessionReducer::new();

        let first = reducer.reduce(&mut state, SessionAction::ConnectionChanged { connected: true }, &env);
        let repeated =
            reducer.reduce(&mut state, SessionAction::ConnectionChanged { connected: true }, &env);

        assert!(state.connected);
        assertions::assert_effects_count(&first, 1);
        assertions::assert_has_future_effect(&first);
        assertions::assert_no_effects(&repeated);
    }

    #[test]
    fn test_disconnecting_emits_nothing() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![]))
            .when_action(SessionAction::ConnectionChanged { connected: false })
            .then_state(|state| {
                assert!(!state.connected);
                assert_eq!(state.activity.latest().unwrap().message, "Disconnected");
            })
            .then_effects(|effects| assertions::assert_no_effects(effects))
            .run();
    }

    #[test]
    fn test_stale_expiry_keeps_newer_notification() {
        let mut state = state_with(vec![]);
        state.notification = Some(Notification {
            id: 2,
            kind: NotificationKind::Served { number: TicketNumber::new(1) },
            raised_at: Utc::now(),
        });

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state)
            .when_action(SessionAction::NotificationExpired { id: 1 })
            .then_state(|state| assert!(state.notification.is_some()))
            .run();
    }

    #[test]
    fn test_matching_expiry_clears_notification() {
        let mut state = state_with(vec![]);
        state.notification = Some(Notification {
            id: 2,
            kind: NotificationKind::Served { number: TicketNumber::new(1) },
            raised_at: Utc::now(),
        });

        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state)
            .when_action(SessionAction::NotificationExpired { id: 2 })
            .then_state(|state| assert!(state.notification.is_none()))
            .run();
    }

    #[test]
    fn test_set_operator_is_logged() {
        ReducerTest::new(SessionReducer::new())
            .with_env(create_test_env())
            .given_state(state_with(vec![]))
            .when_action(SessionAction::SetOperator { kind: Some(TicketKind::Executive) })
            .then_state(|state| {
                assert!(state.is_operator());
                assert_eq!(state.activity.latest().unwrap().message, "Acting as executive operator");
            })
            .run();
    }
}
