//! Event reconciliation: how one inbound [`QueueEvent`] changes the local
//! [`Queue`].
//!
//! [`reduce_event`] is a plain function over the queue. It knows nothing
//! about transports or sessions beyond two explicit inputs: the id of the
//! session's own ticket and the session's id. While the session holds no
//! ticket, any active ticket whose owner is the session counts as its own,
//! so a restarted client keeping its session id picks its ticket back up.
//! Everything the caller must do
//! afterwards (update its own-ticket view, raise a notification, answer a
//! sync request) is reported in the returned [`Reduction`].
//!
//! Properties relied on by peers:
//! - duplicates are harmless: applying an event twice leaves the queue as
//!   applying it once,
//! - an event only touches the ticket it names, so reordering events for
//!   different tickets is harmless,
//! - statuses only move forward; an event naming an unknown ticket, or one
//!   that would move a ticket backwards, is a no-op.

use crate::notification::NotificationKind;
use crate::protocol::QueueEvent;
use crate::queue::Queue;
use crate::types::{SessionId, Ticket, TicketId, TicketKind, TicketStatus};

/// What happened to the session's own ticket
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum OwnTicketChange {
    /// Not affected by this event
    #[default]
    Unchanged,
    /// The own ticket now looks like this
    Updated(Ticket),
    /// The own ticket left the queue (served or cancelled)
    Removed,
    /// A snapshot replaced the queue and did not include the own ticket
    MissingFromSnapshot,
}

/// Outcome of reducing one event
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Reduction {
    /// Whether the queue changed
    pub changed: bool,
    /// Effect on the own ticket
    pub own_ticket: OwnTicketChange,
    /// Notification to raise for the own ticket
    pub notification: Option<NotificationKind>,
    /// Event to broadcast in reply
    pub reply: Option<QueueEvent>,
}

/// Apply `event` to `queue`.
///
/// `own` is the id of the ticket held by the local session, `me` the local
/// session id.
pub fn reduce_event(
    queue: &mut Queue,
    event: &QueueEvent,
    own: Option<&TicketId>,
    me: &SessionId,
) -> Reduction {
    let owns = |ticket: &Ticket| match own {
        Some(id) => *id == ticket.id,
        None => ticket.is_owned_by(me),
    };
    // Resolved before the event can retire the ticket
    let names_own = event
        .ticket_id()
        .is_some_and(|id| own == Some(id) || (own.is_none() && queue.get(id).is_some_and(&owns)));

    let reduction = match event {
        QueueEvent::TicketCreated { ticket } => {
            let changed = queue.insert(ticket.clone());
            Reduction {
                changed,
                own_ticket: if changed && owns(ticket) {
                    snapshot_of(queue, &ticket.id)
                } else {
                    OwnTicketChange::Unchanged
                },
                ..Reduction::default()
            }
        },

        QueueEvent::TicketCalling { ticket_id, operator, .. } => {
            let changed = advance(queue, ticket_id, TicketStatus::Calling, *operator);
            let mut reduction = Reduction { changed, ..Reduction::default() };
            if changed && names_own {
                reduction.own_ticket = snapshot_of(queue, ticket_id);
                if let Some(ticket) = queue.get(ticket_id) {
                    reduction.notification = Some(NotificationKind::Calling {
                        number: ticket.number,
                        operator: *operator,
                    });
                }
            }
            reduction
        },

        QueueEvent::TicketInService { ticket_id, operator, .. } => {
            let changed = advance(queue, ticket_id, TicketStatus::InService, *operator);
            Reduction {
                changed,
                own_ticket: if changed && names_own {
                    snapshot_of(queue, ticket_id)
                } else {
                    OwnTicketChange::Unchanged
                },
                ..Reduction::default()
            }
        },

        QueueEvent::TicketServed { ticket_id, number } => {
            let changed = queue.retire(ticket_id).is_some();
            if names_own {
                Reduction {
                    changed,
                    own_ticket: OwnTicketChange::Removed,
                    notification: Some(NotificationKind::Served { number: *number }),
                    reply: None,
                }
            } else {
                Reduction { changed, ..Reduction::default() }
            }
        },

        QueueEvent::TicketCancelled { ticket_id } => {
            let changed = queue.retire(ticket_id).is_some();
            Reduction {
                changed,
                own_ticket: if names_own {
                    OwnTicketChange::Removed
                } else {
                    OwnTicketChange::Unchanged
                },
                ..Reduction::default()
            }
        },

        QueueEvent::SyncRequest { session_id } => {
            // Delivery includes the sender, and an empty queue would wipe
            // peers that know more.
            let reply = (session_id != me && !queue.is_empty()).then(|| QueueEvent::SyncSnapshot {
                tickets: queue.tickets().to_vec(),
            });
            Reduction { reply, ..Reduction::default() }
        },

        QueueEvent::SyncSnapshot { tickets } => {
            let before = queue.tickets().to_vec();
            queue.replace_all(tickets.iter().cloned());
            let own_ticket = match own {
                None => queue
                    .iter()
                    .find(|ticket| owns(ticket))
                    .cloned()
                    .map_or(OwnTicketChange::Unchanged, OwnTicketChange::Updated),
                Some(id) if queue.contains(id) => snapshot_of(queue, id),
                Some(id) if queue.is_retired(id) => OwnTicketChange::Removed,
                Some(_) => OwnTicketChange::MissingFromSnapshot,
            };
            Reduction {
                changed: before.as_slice() != queue.tickets(),
                own_ticket,
                ..Reduction::default()
            }
        },
    };

    if reduction.changed {
        tracing::debug!(
            tipo = event.type_name(),
            ticket = event.ticket_id().map(TicketId::as_str),
            queue_len = queue.len(),
            "Applied event"
        );
        metrics::counter!("turnos.events.applied", "tipo" => event.type_name()).increment(1);
    } else {
        tracing::trace!(tipo = event.type_name(), "Event left the queue unchanged");
    }

    reduction
}

/// Move a ticket forward to `status` and record `operator`.
///
/// Re-applying the status with a different operator overwrites the operator
/// (last write wins). Returns `true` when the ticket changed.
fn advance(queue: &mut Queue, id: &TicketId, status: TicketStatus, operator: TicketKind) -> bool {
    let applies = queue.get(id).is_some_and(|ticket| {
        ticket.status.rank() < status.rank()
            || (ticket.status == status && ticket.assigned_operator != Some(operator))
    });
    if applies {
        queue.update(id, |ticket| {
            ticket.status = status;
            ticket.assigned_operator = Some(operator);
        });
    }
    applies
}

fn snapshot_of(queue: &Queue, id: &TicketId) -> OwnTicketChange {
    queue
        .get(id)
        .cloned()
        .map_or(OwnTicketChange::Unchanged, OwnTicketChange::Updated)
}
