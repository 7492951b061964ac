//! Local notifications about the session's own ticket.

use crate::types::{TicketKind, TicketNumber};
use chrono::{DateTime, Utc};
use std::fmt;

/// What happened to the own ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    /// An operator is calling the ticket
    Calling {
        /// Ticket number
        number: TicketNumber,
        /// Kind of the calling operator
        operator: TicketKind,
    },
    /// Service finished
    Served {
        /// Ticket number
        number: TicketNumber,
    },
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calling { number, operator } => {
                write!(f, "Your ticket {number} is being called ({operator})")
            },
            Self::Served { number } => write!(f, "Ticket {number} served, thank you for your visit"),
        }
    }
}

/// A raised notification.
///
/// `id` is a per-session generation counter; an expiry timer only clears the
/// notification whose id it was scheduled for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Generation id
    pub id: u64,
    /// Trigger
    pub kind: NotificationKind,
    /// When it was raised
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    /// Text shown to the user
    #[must_use]
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let calling = NotificationKind::Calling {
            number: TicketNumber::new(3),
            operator: TicketKind::Teller,
        };
        assert_eq!(calling.to_string(), "Your ticket #3 is being called (teller)");

        let served = Notification {
            id: 1,
            kind: NotificationKind::Served { number: TicketNumber::new(3) },
            raised_at: Utc::now(),
        };
        assert!(served.message().starts_with("Ticket #3 served"));
    }
}
