//! Events peers exchange and their JSON envelopes.
//!
//! Every envelope is a JSON object tagged by `tipo`:
//!
//! | `tipo` | payload |
//! |---|---|
//! | `nuevo_turno` | `turno` |
//! | `turno_llamando` | `turnoId`, `numero`, `operador`, `tipoTurno` |
//! | `turno_en_atencion` | `turnoId`, `turno`, `operador` |
//! | `turno_atendido` | `turnoId`, `numero` |
//! | `turno_cancelado` | `turnoId` |
//! | `sync_request` | `sessionId` |
//! | `sync_cola` | `cola` |
//!
//! Inbound traffic is untrusted: [`decode`] turns anything it does not
//! understand into a [`ProtocolError`] which callers log and drop.

use crate::types::{SessionId, Ticket, TicketId, TicketKind, TicketNumber};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field carrying the envelope type
pub const TYPE_FIELD: &str = "tipo";

/// A state change or sync message broadcast to every peer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tipo")]
pub enum QueueEvent {
    /// A client requested a new ticket
    #[serde(rename = "nuevo_turno")]
    TicketCreated {
        /// The new ticket, status waiting
        #[serde(rename = "turno")]
        ticket: Ticket,
    },
    /// An operator claimed a ticket
    #[serde(rename = "turno_llamando")]
    TicketCalling {
        /// Claimed ticket
        #[serde(rename = "turnoId")]
        ticket_id: TicketId,
        /// Its display number
        #[serde(rename = "numero")]
        number: TicketNumber,
        /// Kind of the claiming operator
        #[serde(rename = "operador")]
        operator: TicketKind,
        /// Kind of the ticket
        #[serde(rename = "tipoTurno")]
        kind: TicketKind,
    },
    /// An operator started serving a ticket
    #[serde(rename = "turno_en_atencion")]
    TicketInService {
        /// Ticket being served
        #[serde(rename = "turnoId")]
        ticket_id: TicketId,
        /// Full ticket as the operator saw it
        #[serde(rename = "turno")]
        ticket: Ticket,
        /// Kind of the serving operator
        #[serde(rename = "operador")]
        operator: TicketKind,
    },
    /// Service completed
    #[serde(rename = "turno_atendido")]
    TicketServed {
        /// Served ticket
        #[serde(rename = "turnoId")]
        ticket_id: TicketId,
        /// Its display number
        #[serde(rename = "numero")]
        number: TicketNumber,
    },
    /// The owner withdrew a ticket
    #[serde(rename = "turno_cancelado")]
    TicketCancelled {
        /// Withdrawn ticket
        #[serde(rename = "turnoId")]
        ticket_id: TicketId,
    },
    /// A peer asks for the full queue
    #[serde(rename = "sync_request")]
    SyncRequest {
        /// Requesting session
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// Full queue offered by a peer
    #[serde(rename = "sync_cola")]
    SyncSnapshot {
        /// Every active ticket the sender knows
        #[serde(rename = "cola")]
        tickets: Vec<Ticket>,
    },
}

impl QueueEvent {
    /// Every `tipo` value this protocol understands
    pub const TYPES: [&'static str; 7] = [
        "nuevo_turno",
        "turno_llamando",
        "turno_en_atencion",
        "turno_atendido",
        "turno_cancelado",
        "sync_request",
        "sync_cola",
    ];

    /// The `tipo` value of this event
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::TicketCreated { .. } => "nuevo_turno",
            Self::TicketCalling { .. } => "turno_llamando",
            Self::TicketInService { .. } => "turno_en_atencion",
            Self::TicketServed { .. } => "turno_atendido",
            Self::TicketCancelled { .. } => "turno_cancelado",
            Self::SyncRequest { .. } => "sync_request",
            Self::SyncSnapshot { .. } => "sync_cola",
        }
    }

    /// The single ticket this event is about, if any
    #[must_use]
    pub const fn ticket_id(&self) -> Option<&TicketId> {
        match self {
            Self::TicketCreated { ticket } => Some(&ticket.id),
            Self::TicketCalling { ticket_id, .. }
            | Self::TicketInService { ticket_id, .. }
            | Self::TicketServed { ticket_id, .. }
            | Self::TicketCancelled { ticket_id } => Some(ticket_id),
            Self::SyncRequest { .. } | Self::SyncSnapshot { .. } => None,
        }
    }
}

/// Errors decoding or encoding an envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message is not an object with a string `tipo`
    #[error("message has no `tipo` field")]
    MissingType,

    /// The `tipo` is not one this protocol understands
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The payload does not match the envelope for its type
    #[error("malformed `{kind}` message: {reason}")]
    Malformed {
        /// Declared `tipo`
        kind: String,
        /// Deserializer diagnostic
        reason: String,
    },

    /// The event could not be turned into JSON
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Decode an inbound JSON message into an event
///
/// # Errors
///
/// Returns [`ProtocolError`] when the message has no `tipo`, an unknown
/// `tipo`, or a payload that does not fit its envelope.
pub fn decode(message: &Value) -> Result<QueueEvent, ProtocolError> {
    let kind = message
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    if !QueueEvent::TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    QueueEvent::deserialize(message).map_err(|e| ProtocolError::Malformed {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Encode an event as its JSON envelope
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode(event: &QueueEvent) -> Result<Value, ProtocolError> {
    serde_json::to_value(event).map_err(|e| ProtocolError::Encode(e.to_string()))
}
