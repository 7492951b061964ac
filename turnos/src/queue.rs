//! The locally observed queue of active tickets.
//!
//! Tickets are kept sorted by `(number, id)`. Numbers are assigned by each
//! peer from its own view, so two tickets may share a number; the id breaks
//! the tie deterministically on every peer.
//!
//! Alongside the sorted list the queue maintains:
//! - an in-service index (id → ticket) mirroring tickets whose status is
//!   [`TicketStatus::InService`]. It is derived from the list and rebuilt
//!   whenever the list is replaced.
//! - a bounded set of retired ids. Tickets removed as served or cancelled
//!   are remembered so a late duplicate creation cannot bring them back.
//!   Once the set is full the oldest id is forgotten first.

use crate::types::{Ticket, TicketId, TicketNumber, TicketStatus};
use std::collections::{HashMap, HashSet, VecDeque};

/// Retired ids remembered by default
pub const DEFAULT_RETIRED_CAPACITY: usize = 1024;

/// Ordered collection of active tickets
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Queue {
    tickets: Vec<Ticket>,
    in_service: HashMap<TicketId, Ticket>,
    retired: Tombstones,
}

/// Retired ids, oldest first, capped at `capacity`
#[derive(Clone, Debug, PartialEq, Eq)]
struct Tombstones {
    ids: HashSet<TicketId>,
    order: VecDeque<TicketId>,
    capacity: usize,
}

impl Tombstones {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &TicketId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &TicketId) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

impl Default for Tombstones {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RETIRED_CAPACITY)
    }
}

impl Queue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue remembering at most `capacity` retired ids (minimum 1)
    #[must_use]
    pub fn with_retired_capacity(capacity: usize) -> Self {
        Self {
            retired: Tombstones::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Build a queue from arbitrary tickets (duplicates and terminal tickets are dropped)
    #[must_use]
    pub fn from_tickets(tickets: impl IntoIterator<Item = Ticket>) -> Self {
        let mut queue = Self::new();
        queue.replace_all(tickets);
        queue
    }

    /// Active tickets in display order
    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    /// Iterate active tickets in display order
    pub fn iter(&self) -> std::slice::Iter<'_, Ticket> {
        self.tickets.iter()
    }

    /// Number of active tickets
    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether there are no active tickets
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Look up an active ticket
    #[must_use]
    pub fn get(&self, id: &TicketId) -> Option<&Ticket> {
        self.tickets.iter().find(|t| &t.id == id)
    }

    /// Whether an active ticket has this id
    #[must_use]
    pub fn contains(&self, id: &TicketId) -> bool {
        self.get(id).is_some()
    }

    /// Tickets currently in service, keyed by id
    #[must_use]
    pub const fn in_service(&self) -> &HashMap<TicketId, Ticket> {
        &self.in_service
    }

    /// Whether the ticket was removed as served or cancelled
    #[must_use]
    pub fn is_retired(&self, id: &TicketId) -> bool {
        self.retired.contains(id)
    }

    /// Number of retired ids currently remembered
    #[must_use]
    pub fn retired_len(&self) -> usize {
        self.retired.order.len()
    }

    /// Number the next locally created ticket receives: highest active number + 1, or 1
    #[must_use]
    pub fn next_number(&self) -> TicketNumber {
        self.tickets
            .iter()
            .map(|t| t.number)
            .max()
            .map_or(TicketNumber::FIRST, TicketNumber::next)
    }

    /// Insert a ticket unless its id is already active, retired, or its status is terminal.
    ///
    /// Returns `true` when the queue changed.
    pub fn insert(&mut self, ticket: Ticket) -> bool {
        if ticket.status.is_terminal() || self.retired.contains(&ticket.id) || self.contains(&ticket.id) {
            return false;
        }
        self.index(&ticket);
        self.tickets.push(ticket);
        self.sort();
        true
    }

    /// Apply `f` to an active ticket, keeping the in-service index in step.
    ///
    /// Returns the updated ticket, or `None` when the id is not active.
    /// `f` must not change the ticket's id or number.
    pub fn update<F>(&mut self, id: &TicketId, f: F) -> Option<&Ticket>
    where
        F: FnOnce(&mut Ticket),
    {
        let position = self.tickets.iter().position(|t| &t.id == id)?;
        f(&mut self.tickets[position]);
        let ticket = self.tickets[position].clone();
        self.index(&ticket);
        self.tickets.get(position)
    }

    /// Remove a ticket for good and remember its id.
    ///
    /// Unknown ids are retired too, so a creation that arrives after its
    /// removal is ignored.
    pub fn retire(&mut self, id: &TicketId) -> Option<Ticket> {
        self.retired.insert(id);
        self.in_service.remove(id);
        let position = self.tickets.iter().position(|t| &t.id == id)?;
        Some(self.tickets.remove(position))
    }

    /// Replace the active tickets wholesale.
    ///
    /// Retired ids and terminal tickets are filtered out. When the input
    /// repeats an id, the copy furthest along the lifecycle wins.
    pub fn replace_all(&mut self, tickets: impl IntoIterator<Item = Ticket>) {
        let mut latest: HashMap<TicketId, Ticket> = HashMap::new();
        for ticket in tickets {
            if ticket.status.is_terminal() || self.retired.contains(&ticket.id) {
                continue;
            }
            match latest.get(&ticket.id) {
                Some(existing) if existing.status.rank() >= ticket.status.rank() => {},
                _ => {
                    latest.insert(ticket.id.clone(), ticket);
                },
            }
        }

        self.tickets = latest.into_values().collect();
        self.sort();
        self.in_service = self
            .tickets
            .iter()
            .filter(|t| t.status == TicketStatus::InService)
            .map(|t| (t.id.clone(), t.clone()))
            .collect();
    }

    fn index(&mut self, ticket: &Ticket) {
        if ticket.status == TicketStatus::InService {
            self.in_service.insert(ticket.id.clone(), ticket.clone());
        } else {
            self.in_service.remove(&ticket.id);
        }
    }

    fn sort(&mut self) {
        self.tickets
            .sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.id.cmp(&b.id)));
    }
}

impl<'a> IntoIterator for &'a Queue {
    type Item = &'a Ticket;
    type IntoIter = std::slice::Iter<'a, Ticket>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
