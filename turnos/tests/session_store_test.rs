//! Session store tests against a recording transport.
//!
//! These run the real [`Store`] so effects (broadcasts and notification
//! timers) execute. Time is paused, so timers fire as soon as the runtime is
//! otherwise idle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use turnos::config::SessionConfig;
use turnos::identity::SequentialTicketIds;
use turnos::notification::NotificationKind;
use turnos::protocol;
use turnos::{
    QueueEvent, SessionAction, SessionEnvironment, SessionId, SessionReducer, SessionState,
    SessionStore, Ticket, TicketId, TicketKind, TicketNumber, TicketStatus,
};
use turnos_runtime::Store;
use turnos_testing::{RecordingTransport, test_clock};

// ============================================================================
// Fixtures
// ============================================================================

fn store_with(transport: &RecordingTransport, state: SessionState) -> SessionStore {
    let env = SessionEnvironment::new(
        Arc::new(test_clock()),
        Arc::new(transport.clone()),
        SessionConfig::default(),
    )
    .with_ticket_ids(Arc::new(SequentialTicketIds::new("t")));
    Store::new(state, SessionReducer::new(), env)
}

/// Session holding waiting ticket #1
fn holding_ticket() -> (SessionState, Ticket) {
    let mine = Ticket::new(
        TicketId::new("mine"),
        TicketNumber::new(1),
        TicketKind::Teller,
        SessionId::new("user_me"),
        Utc::now(),
    );
    let mut state = SessionState::new(SessionId::new("user_me"));
    state.queue.insert(mine.clone());
    state.my_ticket = Some(mine.clone());
    state.connected = true;
    (state, mine)
}

fn calling(ticket: &Ticket) -> SessionAction {
    SessionAction::EventReceived {
        event: QueueEvent::TicketCalling {
            ticket_id: ticket.id.clone(),
            number: ticket.number,
            operator: TicketKind::Teller,
            kind: ticket.kind,
        },
    }
}

// ============================================================================
// Broadcasting
// ============================================================================

#[tokio::test]
async fn test_request_is_broadcast_as_nuevo_turno() {
    let transport = RecordingTransport::new().without_echo();
    let mut state = SessionState::new(SessionId::new("user_me"));
    state.connected = true;
    let store = store_with(&transport, state);

    let mut handle = store
        .send(SessionAction::RequestTicket { kind: TicketKind::Executive })
        .await
        .unwrap();
    handle.wait().await;

    assert_eq!(transport.sent_types(), vec!["nuevo_turno".to_string()]);
    let event = protocol::decode(&transport.sent()[0]).unwrap();
    let QueueEvent::TicketCreated { ticket } = event else {
        panic!("expected nuevo_turno, got {event:?}");
    };
    assert_eq!(ticket.id, TicketId::new("t_1"));
    assert_eq!(ticket.number, TicketNumber::new(1));
    assert_eq!(ticket.kind, TicketKind::Executive);
    assert_eq!(ticket.owner_session, SessionId::new("user_me"));
}

#[tokio::test]
async fn test_broadcast_while_disconnected_is_dropped() {
    let transport = RecordingTransport::disconnected();
    let store = store_with(&transport, SessionState::new(SessionId::new("user_me")));

    let mut handle = store
        .send(SessionAction::RequestTicket { kind: TicketKind::Teller })
        .await
        .unwrap();
    handle.wait().await;

    assert!(transport.sent().is_empty());
    // The ticket is still held locally
    let (queued, mine) = store.state(|s| (s.queue.len(), s.my_ticket.clone())).await;
    assert_eq!(queued, 1);
    assert!(mine.is_some());
}

#[tokio::test]
async fn test_connecting_sends_sync_request() {
    let transport = RecordingTransport::new().without_echo();
    let store = store_with(&transport, SessionState::new(SessionId::new("user_me")));

    let mut handle = store
        .send(SessionAction::ConnectionChanged { connected: true })
        .await
        .unwrap();
    handle.wait().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["tipo"], "sync_request");
    assert_eq!(sent[0]["sessionId"], "user_me");
}

#[tokio::test]
async fn test_rejected_command_sends_nothing() {
    let transport = RecordingTransport::new().without_echo();
    let (state, mine) = holding_ticket();
    let store = store_with(&transport, state);

    let mut handle = store
        .send(SessionAction::CallTicket { ticket_id: mine.id })
        .await
        .unwrap();
    handle.wait().await;

    assert!(transport.sent().is_empty());
    assert!(store.state(|s| s.last_error.is_some()).await);
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_notification_expires_after_timeout() {
    let transport = RecordingTransport::new();
    let (state, mine) = holding_ticket();
    let store = store_with(&transport, state);

    let started = tokio::time::Instant::now();
    let mut handle = store.send(calling(&mine)).await.unwrap();

    let shown = store.state(|s| s.notification.clone()).await.unwrap();
    assert_eq!(
        shown.kind,
        NotificationKind::Calling {
            number: TicketNumber::new(1),
            operator: TicketKind::Teller,
        }
    );

    handle.wait().await;

    assert!(started.elapsed() >= SessionConfig::default().notification_timeout());
    assert!(store.state(|s| s.notification.is_none()).await);
    assert_eq!(
        store.state(|s| s.my_ticket.as_ref().map(|t| t.status)).await,
        Some(TicketStatus::Calling)
    );
}

#[tokio::test(start_paused = true)]
async fn test_dismissed_notification_stays_dismissed() {
    let transport = RecordingTransport::new();
    let (state, mine) = holding_ticket();
    let store = store_with(&transport, state);

    let mut handle = store.send(calling(&mine)).await.unwrap();
    store.send(SessionAction::DismissNotification).await.unwrap();
    assert!(store.state(|s| s.notification.is_none()).await);

    handle.wait().await;
    assert!(store.state(|s| s.notification.is_none()).await);
}

#[tokio::test(start_paused = true)]
async fn test_replaced_notification_outlives_first_timer() {
    let transport = RecordingTransport::new();
    let (state, mine) = holding_ticket();
    let store = store_with(&transport, state);

    // First notification: called
    let mut first = store.send(calling(&mine)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    // Second notification replaces it before the first timer fires
    let served = SessionAction::EventReceived {
        event: QueueEvent::TicketServed {
            ticket_id: mine.id.clone(),
            number: mine.number,
        },
    };
    let mut second = store.send(served).await.unwrap();

    first.wait().await;
    let still_shown = store.state(|s| s.notification.clone()).await.unwrap();
    assert_eq!(still_shown.kind, NotificationKind::Served { number: TicketNumber::new(1) });

    second.wait().await;
    assert!(store.state(|s| s.notification.is_none()).await);
}

// ============================================================================
// Inbound traffic
// ============================================================================

#[tokio::test]
async fn test_sync_request_from_peer_is_answered_with_queue() {
    let transport = RecordingTransport::new().without_echo();
    let (state, mine) = holding_ticket();
    let store = store_with(&transport, state);

    let mut handle = store
        .send(SessionAction::EventReceived {
            event: QueueEvent::SyncRequest { session_id: SessionId::new("user_new") },
        })
        .await
        .unwrap();
    handle.wait().await;

    assert_eq!(transport.sent_types(), vec!["sync_cola".to_string()]);
    let QueueEvent::SyncSnapshot { tickets } = protocol::decode(&transport.sent()[0]).unwrap() else {
        panic!("expected sync_cola");
    };
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].id, mine.id);
}

#[tokio::test]
async fn test_own_sync_request_is_not_answered() {
    let transport = RecordingTransport::new().without_echo();
    let (state, _) = holding_ticket();
    let store = store_with(&transport, state);

    let mut handle = store
        .send(SessionAction::EventReceived {
            event: QueueEvent::SyncRequest { session_id: SessionId::new("user_me") },
        })
        .await
        .unwrap();
    handle.wait().await;

    assert!(transport.sent().is_empty());
}
