//! Read-only views over a [`Queue`].
//!
//! Nothing here mutates state; views recompute from the queue on every call.

use crate::config::ServiceTimes;
use crate::queue::Queue;
use crate::types::{Ticket, TicketId, TicketKind, TicketNumber, TicketStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Waiting tickets in queue order
#[must_use]
pub fn waiting(queue: &Queue) -> Vec<&Ticket> {
    with_status(queue, TicketStatus::Waiting).collect()
}

/// Tickets being called in queue order
#[must_use]
pub fn calling(queue: &Queue) -> Vec<&Ticket> {
    with_status(queue, TicketStatus::Calling).collect()
}

/// Waiting tickets of one kind
#[must_use]
pub fn waiting_for_kind(queue: &Queue, kind: TicketKind) -> Vec<&Ticket> {
    with_status(queue, TicketStatus::Waiting)
        .filter(|t| t.kind == kind)
        .collect()
}

/// Tickets of `operator`'s kind that an operator of that kind is calling
#[must_use]
pub fn calling_for_operator(queue: &Queue, operator: TicketKind) -> Vec<&Ticket> {
    with_status(queue, TicketStatus::Calling)
        .filter(|t| t.kind == operator && t.assigned_operator == Some(operator))
        .collect()
}

/// Tickets of one kind in service, by number
#[must_use]
pub fn in_service_for_kind(queue: &Queue, kind: TicketKind) -> Vec<&Ticket> {
    let mut tickets: Vec<_> = queue
        .in_service()
        .values()
        .filter(|t| t.kind == kind)
        .collect();
    tickets.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));
    tickets
}

/// 1-based position of a ticket among waiting tickets
///
/// `None` when the ticket is not waiting.
#[must_use]
pub fn position(queue: &Queue, id: &TicketId) -> Option<usize> {
    with_status(queue, TicketStatus::Waiting)
        .position(|t| &t.id == id)
        .map(|index| index + 1)
}

/// Waiting tickets ahead of this one
#[must_use]
pub fn people_ahead(queue: &Queue, id: &TicketId) -> Option<usize> {
    position(queue, id).map(|p| p - 1)
}

/// Expected wait: people ahead times the service time of the ticket's kind
#[must_use]
pub fn estimated_wait(queue: &Queue, ticket: &Ticket, times: &ServiceTimes) -> Option<Duration> {
    let ahead = people_ahead(queue, &ticket.id)?;
    let ahead = u32::try_from(ahead).unwrap_or(u32::MAX);
    Some(times.for_kind(ticket.kind).saturating_mul(ahead))
}

/// Counts per status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting tickets
    pub waiting: usize,
    /// Tickets being called
    pub calling: usize,
    /// Tickets in service
    pub in_service: usize,
}

/// Count tickets per status
#[must_use]
pub fn stats(queue: &Queue) -> QueueStats {
    queue.iter().fold(QueueStats::default(), |mut stats, ticket| {
        match ticket.status {
            TicketStatus::Waiting => stats.waiting += 1,
            TicketStatus::Calling => stats.calling += 1,
            TicketStatus::InService => stats.in_service += 1,
            TicketStatus::Served | TicketStatus::Cancelled => {},
        }
        stats
    })
}

/// The next few waiting numbers and how many more follow
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preview {
    /// First waiting numbers, in queue order
    pub numbers: Vec<TicketNumber>,
    /// Waiting tickets not listed
    pub remaining: usize,
}

/// Summarize the waiting line as its first `limit` numbers
#[must_use]
pub fn preview(queue: &Queue, limit: usize) -> Preview {
    let waiting = waiting(queue);
    Preview {
        numbers: waiting.iter().take(limit).map(|t| t.number).collect(),
        remaining: waiting.len().saturating_sub(limit),
    }
}

/// Time since the ticket was created, zero if its timestamp is in the future
#[must_use]
pub fn service_elapsed(ticket: &Ticket, now: DateTime<Utc>) -> Duration {
    (now - ticket.created_at).to_std().unwrap_or(Duration::ZERO)
}

fn with_status(queue: &Queue, status: TicketStatus) -> impl Iterator<Item = &Ticket> {
    queue.iter().filter(move |t| t.status == status)
}
