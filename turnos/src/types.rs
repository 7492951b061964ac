//! Ticket model: identifiers, service kinds, the status state machine and the
//! [`Ticket`] entity itself.
//!
//! Every type here serializes with the field names and values peers put on
//! the wire (`numero`, `tipo`, `estado`, ...), so a [`Ticket`] can be embedded
//! directly in protocol envelopes.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Opaque ticket identifier, assigned once by the originating client
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap an existing identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier (`turno_<uuid>`)
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("turno_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable per-client identity used to recognize ticket ownership
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    const SUFFIX_LEN: usize = 9;

    /// Wrap an existing identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier: `user_` followed by nine base-36 characters
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..Self::SUFFIX_LEN)
            .filter_map(|_| char::from_digit(rng.gen_range(0..36), 36))
            .collect();
        Self(format!("user_{suffix}"))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display number of a ticket; also the primary sort key of the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Number assigned when the local queue is empty
    pub const FIRST: Self = Self(1);

    /// Wrap a raw number
    #[must_use]
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    /// The number following this one
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Raw value
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Service category of a ticket, and the kind an operator serves
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    /// Counter service
    #[serde(rename = "cajero")]
    Teller,
    /// Account executive
    #[serde(rename = "ejecutivo")]
    Executive,
}

impl TicketKind {
    /// Every kind, in display order
    pub const ALL: [Self; 2] = [Self::Teller, Self::Executive];

    /// Wire value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Teller => "cajero",
            Self::Executive => "ejecutivo",
        }
    }

    /// Default expected service time for one ticket of this kind
    #[must_use]
    pub const fn default_service_time(self) -> Duration {
        match self {
            Self::Teller => Duration::from_secs(5 * 60),
            Self::Executive => Duration::from_secs(15 * 60),
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Teller => f.write_str("teller"),
            Self::Executive => f.write_str("executive"),
        }
    }
}

/// Error parsing a [`TicketKind`] from text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown ticket kind: {0}")]
pub struct ParseKindError(String);

impl FromStr for TicketKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cajero" | "teller" => Ok(Self::Teller),
            "ejecutivo" | "executive" => Ok(Self::Executive),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}

/// Lifecycle status of a ticket
///
/// ```text
/// Waiting ──► Calling ──► InService ──► Served
///    │           │
///    └───────────┴──► Cancelled
/// ```
///
/// No transition is reversible. [`rank`](Self::rank) orders statuses along
/// the lifecycle so stale events can be recognized and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Queued, not yet claimed
    #[serde(rename = "esperando")]
    Waiting,
    /// Claimed by an operator, customer summoned
    #[serde(rename = "llamando")]
    Calling,
    /// Being served
    #[serde(rename = "en_atencion")]
    InService,
    /// Service completed (terminal)
    #[serde(rename = "atendido")]
    Served,
    /// Withdrawn by its owner (terminal)
    #[serde(rename = "cancelado")]
    Cancelled,
}

impl TicketStatus {
    /// Position along the lifecycle; terminal statuses share the top rank
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Calling => 1,
            Self::InService => 2,
            Self::Served | Self::Cancelled => 3,
        }
    }

    /// Whether the ticket has left the active queue for good
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Served | Self::Cancelled)
    }

    /// Whether a locally issued command may move a ticket from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Calling)
                | (Self::Calling, Self::InService)
                | (Self::InService, Self::Served)
                | (Self::Waiting | Self::Calling, Self::Cancelled)
        )
    }

    /// Wire value
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "esperando",
            Self::Calling => "llamando",
            Self::InService => "en_atencion",
            Self::Served => "atendido",
            Self::Cancelled => "cancelado",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single customer's request for service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier
    pub id: TicketId,
    /// Display and ordering number
    #[serde(rename = "numero")]
    pub number: TicketNumber,
    /// Service category
    #[serde(rename = "tipo")]
    pub kind: TicketKind,
    /// Lifecycle status
    #[serde(rename = "estado")]
    pub status: TicketStatus,
    /// Advisory creation time, never used for ordering
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Session that requested the ticket
    #[serde(rename = "sessionId")]
    pub owner_session: SessionId,
    /// Operator kind that claimed the ticket
    #[serde(rename = "operador", default, skip_serializing_if = "Option::is_none")]
    pub assigned_operator: Option<TicketKind>,
}

impl Ticket {
    /// Create a waiting ticket
    #[must_use]
    pub const fn new(
        id: TicketId,
        number: TicketNumber,
        kind: TicketKind,
        owner_session: SessionId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            kind,
            status: TicketStatus::Waiting,
            created_at,
            owner_session,
            assigned_operator: None,
        }
    }

    /// Whether `session` requested this ticket
    #[must_use]
    pub fn is_owned_by(&self, session: &SessionId) -> bool {
        &self.owner_session == session
    }
}
